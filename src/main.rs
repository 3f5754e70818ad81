//! Binary entrypoint for the padlink station CLI.
//!
//! Commands:
//! - `start [--port <n>] [--summary-secs <s>] [--json]` - run the station until Ctrl-C
//! - `init` - write a starter `config.toml`
//! - `check-config` - load, validate and print the effective settings
//! - `simulate-pad --slot <n> [--station <addr>] [--port <n>] [--secret <s>]` - run a software pad
//! - `console-ports` - list serial ports (requires the `serial` feature)
//!
//! See the library crate docs for module-level details: `padlink::`.
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::sync::watch;

use padlink::config::Config;
use padlink::metrics;
use padlink::pads::sim::{SimConfig, SimulatedPad};
use padlink::pads::{PadLink, DEFAULT_PORT, DEFAULT_SECRET};

#[derive(Parser)]
#[command(name = "padlink")]
#[command(about = "Pad communication station for a launch-control system")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the station
    Start {
        /// Discovery port, overriding the config file
        #[arg(short, long)]
        port: Option<i64>,

        /// Seconds between fleet summaries (0 disables)
        #[arg(long, default_value_t = 10)]
        summary_secs: u64,

        /// Print summaries as JSON lines on stdout
        #[arg(long)]
        json: bool,
    },
    /// Write a default configuration file
    Init,
    /// Validate the configuration file and print the effective settings
    CheckConfig,
    /// Run a simulated pad
    SimulatePad {
        /// Slot index the pad announces
        #[arg(short, long)]
        slot: u8,
        /// Station address for announcements (broadcast by default)
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::BROADCAST))]
        station: IpAddr,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(long, default_value = DEFAULT_SECRET)]
        secret: String,
    },
    /// List serial ports usable for the control console
    ConsolePorts,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init | Commands::SimulatePad { .. } | Commands::ConsolePorts => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start {
            port,
            summary_secs,
            json,
        } => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting padlink v{}", env!("CARGO_PKG_VERSION"));
            let link = Arc::new(config.build_link()?);
            if let Some(p) = port {
                link.set_port(p)?;
            }
            run_station(link, &config, summary_secs, json).await?;
        }
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::CheckConfig => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let settings = config.to_settings()?;
            println!("config: {}", cli.config);
            println!("discovery: {}:{}", settings.bind_address, settings.port);
            println!("fleet size: {}", config.station.fleet_size);
            println!("link timing: {:?}", settings.timing);
            println!(
                "staleness: tick {:?}, stale after {}",
                settings.tick, config.staleness.stale_after_secs
            );
            if config.console.enabled {
                println!(
                    "console: {} @ {} baud",
                    config.console.port, config.console.baud_rate
                );
            }
        }
        Commands::SimulatePad {
            slot,
            station,
            port,
            secret,
        } => {
            padlink::validation::validate_secret(&secret)?;
            let config = SimConfig {
                slot,
                station: SocketAddr::new(station, port),
                listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
                secret,
                ..SimConfig::default()
            };
            let pad = Arc::new(SimulatedPad::bind(config).await?);
            let (stop_tx, stop_rx) = watch::channel(false);
            let runner = tokio::spawn(pad.clone().run(stop_rx));
            tokio::signal::ctrl_c().await?;
            let _ = stop_tx.send(true);
            runner.await??;
            info!("Simulated pad received {} command bytes", pad.received().len());
        }
        Commands::ConsolePorts => {
            #[cfg(feature = "serial")]
            {
                let ports = padlink::console::list_ports()?;
                if ports.is_empty() {
                    println!("No serial ports found");
                }
                for p in ports {
                    println!("{}", p);
                }
            }
            #[cfg(not(feature = "serial"))]
            {
                error!("console-ports requires the 'serial' feature");
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

async fn run_station(
    link: Arc<PadLink>,
    config: &Config,
    summary_secs: u64,
    json: bool,
) -> Result<()> {
    let addr = link
        .start()
        .await
        .map_err(|e| anyhow!("Failed to start pad link: {}", e))?;
    info!("Station listening on {}", addr);

    #[cfg(feature = "serial")]
    let console = if config.console.enabled {
        match padlink::console::ConsoleLink::open(&config.console.port, config.console.baud_rate) {
            Ok((console, events)) => Some((console, events)),
            Err(e) => {
                warn!("Console unavailable ({}); continuing without it", e);
                None
            }
        }
    } else {
        None
    };
    #[cfg(not(feature = "serial"))]
    if config.console.enabled {
        warn!("Console enabled in config but this build lacks the 'serial' feature");
    }

    #[cfg(feature = "serial")]
    let (console, mut console_events) = match console {
        Some((c, rx)) => (Some(c), Some(rx)),
        None => (None, None),
    };
    #[cfg(not(feature = "serial"))]
    let mut console_events: Option<()> = None;
    let mut console_armed = false;

    let mut summary = tokio::time::interval(Duration::from_secs(summary_secs.max(1)));
    summary.tick().await;
    let mut status = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            _ = summary.tick(), if summary_secs > 0 => log_summary(&link, json),
            _ = status.tick() => {
                #[cfg(feature = "serial")]
                if let Some(c) = console.as_ref() {
                    if let Err(e) = c.send_status(console_status(&link, console_armed)) {
                        warn!("Console status update failed: {}", e);
                    }
                }
            }
            Some(event) = next_console_event(&mut console_events) => {
                console_armed = event.arm_hmi;
                if event.launch_edge {
                    fire_ready_pads(&link, console_armed).await;
                }
            }
        }
    }

    #[cfg(feature = "serial")]
    if let Some(c) = console {
        let _ = tokio::task::spawn_blocking(move || c.close()).await;
    }
    link.stop().await;
    log_summary(&link, json);
    Ok(())
}

#[cfg(feature = "serial")]
async fn next_console_event(
    events: &mut Option<tokio::sync::mpsc::UnboundedReceiver<padlink::console::ConsoleEvent>>,
) -> Option<padlink::console::ConsoleEvent> {
    match events.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(feature = "serial"))]
async fn next_console_event(_: &mut Option<()>) -> Option<padlink::console::ConsoleEvent> {
    std::future::pending().await
}

#[cfg(feature = "serial")]
fn console_status(link: &PadLink, console_armed: bool) -> padlink::console::ConsoleStatus {
    let live: Vec<_> = link
        .snapshot()
        .into_iter()
        .filter(|p| link.has_active_connection(p.slot))
        .collect();
    padlink::console::ConsoleStatus {
        arm_hmi: console_armed,
        arm_pad: live.iter().any(|p| p.arm_status),
        continuity: !live.is_empty() && live.iter().all(|p| p.continuity),
    }
}

/// Momentary launch to every connected pad the operator marked ready to fire.
async fn fire_ready_pads(link: &PadLink, console_armed: bool) {
    use padlink::pads::codec::CommandBit;
    if !console_armed {
        warn!("Launch switch ignored: console key is not armed");
        return;
    }
    for pad in link.snapshot() {
        if !pad.ready_to_fire || !link.has_active_connection(pad.slot) {
            continue;
        }
        match link.try_send_command(pad.slot, CommandBit::Launch, None).await {
            Ok(mask) => info!("Launch sent to pad {} (0b{:08b})", pad.letter(), mask),
            Err(e) => error!("Launch to pad {} failed: {}", pad.letter(), e),
        }
    }
}

fn log_summary(link: &PadLink, json: bool) {
    let pads = link.snapshot();
    if json {
        let payload = serde_json::json!({
            "pads": pads,
            "connected": link.connected_peers(),
            "metrics": metrics::snapshot(),
        });
        println!("{}", payload);
        return;
    }
    for pad in &pads {
        let Some(ip) = pad.ip_address else {
            continue;
        };
        info!(
            "pad {} @ {}: {:.2} V, rssi {:.0} ({:?}), continuity={}, armed={}, age={}s{}",
            pad.letter(),
            ip,
            pad.voltage,
            pad.rssi,
            pad.rssi_band(),
            pad.continuity,
            pad.arm_status,
            pad.last_contact_age,
            if pad.is_stale() { " STALE" } else { "" }
        );
    }
    let m = metrics::snapshot();
    info!(
        "links: {} connected, {} frames, {} commands sent ({} failed), {} discovery rejects",
        link.connected_peers().len(),
        m.frames_decoded,
        m.commands_sent,
        m.commands_failed,
        m.discovery_rejected
    );
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins; otherwise the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config.as_ref().and_then(|cfg| {
        let path = cfg.logging.file.as_ref()?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    let security_path = config
        .as_ref()
        .and_then(|cfg| cfg.logging.security_file.clone());

    match file {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Foreground runs mirror the file log to the console
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }

                if record.target() == "security" {
                    if let Some(ref sec_path) = security_path {
                        if let Ok(mut sf) = std::fs::OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(sec_path)
                        {
                            let _ = writeln!(sf, "{}", line);
                        }
                    }
                }

                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
