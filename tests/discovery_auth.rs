mod common;

use std::time::Duration;

use common::*;
use padlink::pads::codec::Telemetry;
use padlink::pads::errors::PadError;
use padlink::pads::PadLink;
use padlink::validation::ConfigError;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn valid_announcement_binds_slot_and_opens_link() {
    let (pads, port) = pad_listener().await;
    let link = PadLink::new(6, settings(port));
    let addr = link.start().await.expect("start");
    assert_eq!(addr.port(), port);
    assert!(link.is_listening());

    announce(port, 3).await;
    let mut stream = accept(&pads).await;
    // A fresh session always begins with the stored mask, which starts at zero.
    assert_eq!(read_command(&mut stream).await, 0);

    let pad = link.get(3).expect("slot 3");
    assert_eq!(pad.ip_address, Some(LOCALHOST));
    assert_eq!(pad.last_contact_age, 0);
    assert!(link.has_active_connection(3));
    assert!(!link.has_active_connection(2));

    link.stop().await;
    assert!(!link.is_listening());
    assert!(!link.has_active_connection(3));
}

#[tokio::test]
async fn rejected_datagrams_change_nothing() {
    let (pads, port) = pad_listener().await;
    let link = PadLink::new(6, settings(port));
    link.start().await.expect("start");
    let before = link.snapshot();

    announce_with(port, 1, "RLCU!2024").await;
    announce(port, 6).await;
    announce(port, 200).await;
    send_raw(port, &[0x01, b'R', b'L']).await;
    send_raw(port, &[]).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(link.snapshot(), before);
    assert!(
        tokio::time::timeout(Duration::from_millis(300), pads.accept())
            .await
            .is_err(),
        "no link may be opened for a rejected announcement"
    );
    link.stop().await;
}

#[tokio::test]
async fn listener_survives_garbage_and_keeps_accepting() {
    let (pads, port) = pad_listener().await;
    let link = PadLink::new(2, settings(port));
    link.start().await.expect("start");

    send_raw(port, &[0xff; 600]).await;
    announce(port, 1).await;
    let _stream = accept(&pads).await;
    assert!(wait_until(Duration::from_secs(2), || link.get(1).unwrap().ip_address.is_some()).await);
    link.stop().await;
}

#[tokio::test]
async fn start_is_idempotent_and_restartable() {
    let (_pads, port) = pad_listener().await;
    let link = PadLink::new(2, settings(port));
    let first = link.start().await.expect("start");
    let again = link.start().await.expect("second start");
    assert_eq!(first, again);

    link.stop().await;
    // Stop twice is harmless.
    link.stop().await;

    let restarted = link.start().await.expect("restart on the released port");
    assert_eq!(restarted.port(), port);
    link.stop().await;
}

#[tokio::test]
async fn invalid_settings_are_rejected_and_not_applied() {
    let (_pads, port) = pad_listener().await;
    let link = PadLink::new(2, settings(port));

    assert!(link.set_port(0).is_err());
    assert!(link.set_port(70000).is_err());
    assert!(link.set_bind_address("localhost:5555").is_err());
    assert!(link.set_shared_secret("").is_err());
    assert!(link.set_shared_secret("a-secret-longer-than-16").is_err());
    assert_eq!(link.settings(), settings(port));

    link.set_shared_secret("pad-key").expect("valid secret");
    link.set_bind_address(" 127.0.0.1 ").expect("valid address");
    assert_eq!(link.settings().shared_secret, "pad-key");
}

#[tokio::test]
async fn new_secret_applies_on_next_start() {
    let (pads, port) = pad_listener().await;
    let link = PadLink::new(2, settings(port));
    link.start().await.expect("start");
    link.set_shared_secret("pad-key").expect("valid secret");

    // Still running with the old secret.
    announce_with(port, 0, "pad-key").await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(link.get(0).unwrap().ip_address, None);

    link.stop().await;
    link.start().await.expect("restart");
    announce_with(port, 0, "pad-key").await;
    let _stream = accept(&pads).await;
    assert_eq!(link.get(0).unwrap().ip_address, Some(LOCALHOST));
    link.stop().await;
}

#[tokio::test]
async fn repeated_announcements_reuse_the_running_worker() {
    let (pads, port) = pad_listener().await;
    let link = PadLink::new(6, settings(port));
    link.start().await.expect("start");

    announce(port, 1).await;
    let mut stream = accept(&pads).await;
    assert_eq!(read_command(&mut stream).await, 0);
    assert_eq!(link.worker_count(), 1);

    for _ in 0..5 {
        announce(port, 1).await;
    }
    // Same address, new slot: the worker follows it instead of being replaced.
    announce(port, 3).await;
    assert!(wait_until(Duration::from_secs(2), || link.get(3).unwrap().ip_address == Some(LOCALHOST)).await);

    assert!(
        tokio::time::timeout(Duration::from_millis(400), pads.accept())
            .await
            .is_err(),
        "a live peer must not be dialled a second time"
    );
    assert_eq!(link.worker_count(), 1);
    assert_eq!(link.get(1).unwrap().ip_address, None);

    stream
        .write_all(
            &Telemetry {
                voltage: 12.0,
                rssi: -50.0,
                interlock_removed: false,
                continuity: true,
                igniter_id: 3,
            }
            .encode(),
        )
        .await
        .expect("write frame");
    assert!(wait_until(Duration::from_secs(2), || link.get(3).unwrap().frames_received == 1).await);
    assert_eq!(link.get(1).unwrap().frames_received, 0);
    assert!(link.has_active_connection(3));
    link.stop().await;
    assert_eq!(link.worker_count(), 0);
}

#[tokio::test]
async fn start_rejects_zero_timings() {
    let (_pads, port) = pad_listener().await;

    let mut cfg = settings(port);
    cfg.tick = Duration::ZERO;
    let link = PadLink::new(2, cfg);
    assert!(matches!(
        link.start().await,
        Err(PadError::Config(ConfigError::ZeroDuration { field: "tick" }))
    ));
    assert!(!link.is_listening());

    let mut cfg = settings(port);
    cfg.timing.read_poll = Duration::ZERO;
    let link = PadLink::new(2, cfg);
    assert!(matches!(
        link.start().await,
        Err(PadError::Config(ConfigError::ZeroDuration { .. }))
    ));
    assert!(!link.is_listening());
}

#[tokio::test]
async fn start_rejects_unaddressable_fleet_sizes() {
    let (_pads, port) = pad_listener().await;
    for size in [0, 257, 300] {
        let link = PadLink::new(size, settings(port));
        assert!(
            matches!(
                link.start().await,
                Err(PadError::Config(ConfigError::FleetSize { got, .. })) if got == size
            ),
            "fleet of {} accepted",
            size
        );
        assert!(!link.is_listening());
    }
    let link = PadLink::new(256, settings(port));
    link.start().await.expect("largest fleet");
    link.stop().await;
}
