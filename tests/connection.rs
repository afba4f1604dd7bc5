use grpc_core::{
    ConnEffect, ConnEvent, ConnectionConfig, ConnectionManager, ErrorType, FlushKind,
    ShutdownReason, TimerKind, U31_MAX,
};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

fn stream_id(id: u32) -> NonZeroU32 {
    NonZeroU32::new(id).unwrap()
}

fn goaways(effects: &[ConnEffect]) -> Vec<(u32, ErrorType, Vec<u8>)> {
    effects
        .iter()
        .filter_map(|e| match e {
            ConnEffect::SendGoAway {
                last_stream,
                error,
                debug,
            } => Some((*last_stream, *error, debug.clone())),
            _ => None,
        })
        .collect()
}

fn sent_ping(effects: &[ConnEffect]) -> Option<[u8; 8]> {
    effects.iter().find_map(|e| match e {
        ConnEffect::SendPing { ack: false, data } => Some(*data),
        _ => None,
    })
}

#[test]
fn two_phase_goaway() {
    let _ = env_logger::try_init();
    let mut manager = ConnectionManager::new(ConnectionConfig::default());
    let now = Instant::now();
    manager.activate(now);
    manager.handle(ConnEvent::StreamOpened(stream_id(5)), now);
    manager.handle(ConnEvent::StreamOpened(stream_id(7)), now);

    let effects = manager.handle(ConnEvent::Shutdown(ShutdownReason::Admin), now);
    assert_eq!(
        goaways(&effects),
        vec![(U31_MAX.get(), ErrorType::NoError, Vec::new())]
    );
    let payload = sent_ping(&effects).expect("shutdown ping");

    // A foreign ack changes nothing.
    let effects = manager.handle(
        ConnEvent::Ping {
            ack: true,
            data: [9; 8],
        },
        now,
    );
    assert!(goaways(&effects).is_empty());

    // The matching ack pins the second GOAWAY to the highest opened stream.
    let effects = manager.handle(
        ConnEvent::Ping {
            ack: true,
            data: payload,
        },
        now,
    );
    assert_eq!(goaways(&effects), vec![(7, ErrorType::NoError, Vec::new())]);
    assert!(!effects.contains(&ConnEffect::Close));

    // Connection closes once the in-flight streams drain.
    manager.handle(ConnEvent::StreamClosed(stream_id(5)), now);
    let effects = manager.handle(ConnEvent::StreamClosed(stream_id(7)), now);
    assert!(effects.contains(&ConnEffect::Close));
}

#[test]
fn two_phase_goaway_closes_immediately_without_streams() {
    let mut manager = ConnectionManager::new(ConnectionConfig::default());
    let now = Instant::now();
    manager.activate(now);

    let effects = manager.handle(ConnEvent::Shutdown(ShutdownReason::Admin), now);
    let payload = sent_ping(&effects).unwrap();
    let effects = manager.handle(
        ConnEvent::Ping {
            ack: true,
            data: payload,
        },
        now,
    );
    assert_eq!(goaways(&effects), vec![(0, ErrorType::NoError, Vec::new())]);
    assert!(effects.contains(&ConnEffect::Close));
}

#[test]
fn grace_timer_force_closes() {
    let mut manager = ConnectionManager::new(ConnectionConfig {
        grace_timeout: Some(Duration::from_secs(1)),
        ..ConnectionConfig::default()
    });
    let now = Instant::now();
    manager.activate(now);
    manager.handle(ConnEvent::StreamOpened(stream_id(1)), now);

    let effects = manager.handle(ConnEvent::Shutdown(ShutdownReason::Admin), now);
    let payload = sent_ping(&effects).unwrap();
    let effects = manager.handle(
        ConnEvent::Ping {
            ack: true,
            data: payload,
        },
        now,
    );
    assert!(effects.iter().any(|e| matches!(
        e,
        ConnEffect::ArmTimer {
            kind: TimerKind::Grace,
            ..
        }
    )));
    let effects = manager.handle(ConnEvent::TimerFired(TimerKind::Grace), now);
    assert_eq!(effects, vec![ConnEffect::Close]);
}

#[test]
fn ping_flood_terminates_after_third_ping() {
    // No open streams, pings without calls disallowed, default strikes.
    let mut manager = ConnectionManager::new(ConnectionConfig::default());
    let mut now = Instant::now();
    manager.activate(now);

    for i in 1..=2u32 {
        now += Duration::from_millis(10);
        let effects = manager.handle(
            ConnEvent::Ping {
                ack: false,
                data: [i as u8; 8],
            },
            now,
        );
        // Strikes accumulate silently; the ping is still acked.
        assert!(effects
            .iter()
            .any(|e| matches!(e, ConnEffect::SendPing { ack: true, .. })));
    }

    now += Duration::from_millis(10);
    let effects = manager.handle(
        ConnEvent::Ping {
            ack: false,
            data: [3; 8],
        },
        now,
    );
    assert_eq!(
        goaways(&effects),
        vec![(0, ErrorType::EnhanceYourCalm, b"too_many_pings".to_vec())]
    );
    assert!(effects.contains(&ConnEffect::Close));
}

#[test]
fn writes_reset_ping_strikes() {
    let mut manager = ConnectionManager::new(ConnectionConfig::default());
    let mut now = Instant::now();
    manager.activate(now);

    for i in 0..10u8 {
        now += Duration::from_millis(10);
        manager.handle(
            ConnEvent::Ping {
                ack: false,
                data: [i; 8],
            },
            now,
        );
        // Interleaved HEADERS/DATA flushes keep resetting the counter, so
        // the flood never trips.
        let kind = if i % 2 == 0 {
            FlushKind::Headers
        } else {
            FlushKind::Data
        };
        manager.handle(ConnEvent::FrameFlushed(kind), now);
    }
    now += Duration::from_millis(10);
    let effects = manager.handle(
        ConnEvent::Ping {
            ack: false,
            data: [99; 8],
        },
        now,
    );
    assert!(goaways(&effects).is_empty());
}

#[test]
fn open_streams_use_configured_ping_interval() {
    let mut manager = ConnectionManager::new(ConnectionConfig {
        min_ping_interval: Duration::from_millis(50),
        ..ConnectionConfig::default()
    });
    let mut now = Instant::now();
    manager.activate(now);
    manager.handle(ConnEvent::StreamOpened(stream_id(1)), now);

    for i in 0..5u8 {
        now += Duration::from_millis(60);
        let effects = manager.handle(
            ConnEvent::Ping {
                ack: false,
                data: [i; 8],
            },
            now,
        );
        assert!(goaways(&effects).is_empty(), "ping {i} was over the interval");
    }
}

#[test]
fn keepalive_ping_and_timeout() {
    let mut manager = ConnectionManager::new(ConnectionConfig {
        keepalive_interval: Some(Duration::from_secs(10)),
        keepalive_timeout: Duration::from_secs(2),
        ..ConnectionConfig::default()
    });
    let now = Instant::now();
    let effects = manager.activate(now);
    assert!(effects.iter().any(|e| matches!(
        e,
        ConnEffect::ArmTimer {
            kind: TimerKind::KeepAliveSend,
            ..
        }
    )));

    let effects = manager.handle(ConnEvent::TimerFired(TimerKind::KeepAliveSend), now);
    let payload = sent_ping(&effects).expect("keep-alive ping");
    assert!(effects.iter().any(|e| matches!(
        e,
        ConnEffect::ArmTimer {
            kind: TimerKind::KeepAliveAck,
            ..
        }
    )));

    // Ack in time cancels the timeout.
    let effects = manager.handle(
        ConnEvent::Ping {
            ack: true,
            data: payload,
        },
        now,
    );
    assert!(effects.contains(&ConnEffect::CancelTimer(TimerKind::KeepAliveAck)));

    // A missed ack initiates graceful shutdown.
    let effects = manager.handle(ConnEvent::TimerFired(TimerKind::KeepAliveAck), now);
    assert_eq!(
        goaways(&effects),
        vec![(U31_MAX.get(), ErrorType::NoError, Vec::new())]
    );
}

#[test]
fn inbound_read_rearms_keepalive() {
    let mut manager = ConnectionManager::new(ConnectionConfig {
        keepalive_interval: Some(Duration::from_secs(10)),
        ..ConnectionConfig::default()
    });
    let now = Instant::now();
    manager.activate(now);
    let effects = manager.handle(ConnEvent::ReadCompleted, now);
    assert!(effects.contains(&ConnEffect::CancelTimer(TimerKind::KeepAliveAck)));
    assert!(effects.iter().any(|e| matches!(
        e,
        ConnEffect::ArmTimer {
            kind: TimerKind::KeepAliveSend,
            ..
        }
    )));
}

#[test]
fn idle_timer_drives_shutdown() {
    let mut manager = ConnectionManager::new(ConnectionConfig {
        idle_timeout: Some(Duration::from_secs(30)),
        ..ConnectionConfig::default()
    });
    let now = Instant::now();
    let effects = manager.activate(now);
    assert!(effects.iter().any(|e| matches!(
        e,
        ConnEffect::ArmTimer {
            kind: TimerKind::Idle,
            ..
        }
    )));

    // Opening a stream cancels the idle timer; the last close re-arms it.
    let effects = manager.handle(ConnEvent::StreamOpened(stream_id(1)), now);
    assert!(effects.contains(&ConnEffect::CancelTimer(TimerKind::Idle)));
    let effects = manager.handle(ConnEvent::StreamClosed(stream_id(1)), now);
    assert!(effects.iter().any(|e| matches!(
        e,
        ConnEffect::ArmTimer {
            kind: TimerKind::Idle,
            ..
        }
    )));

    let effects = manager.handle(ConnEvent::TimerFired(TimerKind::Idle), now);
    assert_eq!(
        goaways(&effects),
        vec![(U31_MAX.get(), ErrorType::NoError, Vec::new())]
    );
}

#[test]
fn max_age_drives_shutdown() {
    let mut manager = ConnectionManager::new(ConnectionConfig {
        max_age: Some(Duration::from_secs(60)),
        ..ConnectionConfig::default()
    });
    let now = Instant::now();
    let effects = manager.activate(now);
    assert!(effects.iter().any(|e| matches!(
        e,
        ConnEffect::ArmTimer {
            kind: TimerKind::MaxAge,
            ..
        }
    )));
    let effects = manager.handle(ConnEvent::TimerFired(TimerKind::MaxAge), now);
    assert!(sent_ping(&effects).is_some());
    assert!(manager.is_shutting_down());

    // A second shutdown trigger is a no-op.
    let effects = manager.handle(ConnEvent::Shutdown(ShutdownReason::Admin), now);
    assert!(effects.is_empty());
}
