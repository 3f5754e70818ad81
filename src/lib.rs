//! # Padlink - Pad Communication Core for a Launch-Control Station
//!
//! Padlink discovers launch pads on the local network, keeps one supervised stream
//! session per pad, decodes their telemetry into a shared fleet state and delivers
//! operator commands as a single persistent bitmask byte.
//!
//! ## Features
//!
//! - **Authenticated discovery**: pads announce `[slot][token]` over UDP; only the shared token binds an address to a slot.
//! - **Supervised links**: one worker per pad address with connect timeout, telemetry timeout and reconnect backoff.
//! - **Persistent command intent**: the operator's mask survives reconnects and is re-sent first on every new session.
//! - **Staleness**: a once-per-second ticker ages every pad; contact resets it.
//! - **Control console**: optional serial link to the hardware arm/launch console.
//! - **Simulator**: a software pad for bench testing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use padlink::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let link = config.build_link()?;
//!     link.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     link.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`pads`] - discovery, link workers, telemetry, commands and the fleet state store
//! - [`console`] - control console serial protocol
//! - [`config`] - configuration file loading and validation
//! - [`validation`] - checks for operator-supplied settings
//! - [`metrics`] - process-wide counters
//! - [`logutil`] - helpers for logging untrusted input

pub mod config;
pub mod console;
pub mod logutil;
pub mod metrics;
pub mod pads;
pub mod validation;
