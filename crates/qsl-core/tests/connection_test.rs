//! End-to-end connection tests against the simulated mote.
//!
//! The connection and the mote share one `ManualClock`, so every blocking
//! wait advances simulated time instead of sleeping.

use qsl_core::{Connection, ConnectionState, NetworkConfig, QslConfig, QslError, ResetMode};
use qsl_mote_sim::{MoteBehavior, SimMote};
use qsl_protocol::{Clock, CommandKind, ManualClock, MoteState, NoopLiveness, ResultCode};

type SimConnection = Connection<SimMote<ManualClock>, ManualClock, NoopLiveness>;

fn setup_with(behavior: MoteBehavior, config: QslConfig) -> (SimConnection, ManualClock) {
    let clock = ManualClock::new();
    let mote = SimMote::new(clock.clone(), behavior);
    let mut conn = Connection::new(mote, clock.clone(), NoopLiveness, config);
    conn.init().expect("init");
    (conn, clock)
}

fn setup(behavior: MoteBehavior) -> (SimConnection, ManualClock) {
    setup_with(behavior, QslConfig::default())
}

fn connected(behavior: MoteBehavior) -> (SimConnection, ManualClock) {
    let (mut conn, clock) = setup(behavior);
    conn.connect(&NetworkConfig::new(0x1234)).expect("connect");
    (conn, clock)
}

fn mote(conn: &SimConnection) -> &SimMote<ManualClock> {
    conn.adapter()
}

// ============================================================================
// Connect
// ============================================================================

#[test]
fn test_connect_happy_path() {
    let (mut conn, _clock) = setup(MoteBehavior::default());
    assert_eq!(conn.connect(&NetworkConfig::new(0x1234)), Ok(()));
    assert!(conn.is_connected());
    assert_eq!(conn.network_id(), 0x1234);
    assert_eq!(conn.socket_id(), Some(22));
    assert_eq!(
        mote(&conn).issued(),
        &[
            CommandKind::GetMoteStatus,
            CommandKind::OpenSocket,
            CommandKind::BindSocket,
            CommandKind::SetJoinKey,
            CommandKind::SetNetworkId,
            CommandKind::Join,
        ]
    );
    assert_eq!(mote(&conn).state(), MoteState::Operational);

    // Same credentials again: nothing to do.
    assert_eq!(conn.connect(&NetworkConfig::new(0x1234)), Ok(()));
    assert_eq!(mote(&conn).issued().len(), 6);
}

#[test]
fn test_connect_rejects_reserved_network_id() {
    let (mut conn, _clock) = setup(MoteBehavior::default());
    assert_eq!(
        conn.connect(&NetworkConfig::new(0xFFFF)),
        Err(QslError::InvalidNetworkId(0xFFFF))
    );
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(mote(&conn).issued().is_empty());
}

#[test]
fn test_connect_before_init() {
    let clock = ManualClock::new();
    let sim = SimMote::new(clock.clone(), MoteBehavior::default());
    let mut conn = Connection::new(sim, clock, NoopLiveness, QslConfig::default());
    assert_eq!(
        conn.connect(&NetworkConfig::new(0x1234)),
        Err(QslError::NotInitialized)
    );
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(mote(&conn).issued().is_empty());

    conn.init().unwrap();
    assert_eq!(conn.connect(&NetworkConfig::new(0x1234)), Ok(()));
    assert!(conn.is_connected());
}

#[test]
fn test_operational_mote_is_reset_before_joining() {
    let (mut conn, _clock) = setup(MoteBehavior {
        initial_state: MoteState::Operational,
        ..MoteBehavior::default()
    });
    assert_eq!(conn.connect(&NetworkConfig::new(0x1234)), Ok(()));
    assert_eq!(mote(&conn).issued_count(CommandKind::Reset), 1);
    assert_eq!(mote(&conn).issued_count(CommandKind::GetMoteStatus), 2);
}

#[test]
fn test_graceful_reset_uses_disconnect() {
    let config = QslConfig {
        reset_mode: ResetMode::Graceful,
        ..QslConfig::default()
    };
    let behavior = MoteBehavior {
        initial_state: MoteState::Operational,
        ..MoteBehavior::default()
    };
    let (mut conn, _clock) = setup_with(behavior, config);
    assert_eq!(conn.connect(&NetworkConfig::new(0x1234)), Ok(()));
    assert_eq!(mote(&conn).issued_count(CommandKind::Disconnect), 1);
    assert_eq!(mote(&conn).issued_count(CommandKind::Reset), 0);
}

#[test]
fn test_lost_join_reply_requeries_status() {
    // The join outlives the response timeout, so the missing reply is noticed
    // before the mote turns operational.
    let behavior = MoteBehavior {
        join_duration_ms: 1_000,
        ..MoteBehavior::default()
    }
    .with_dropped(CommandKind::Join, Some(1));
    let (mut conn, _clock) = setup(behavior);

    assert_eq!(conn.connect(&NetworkConfig::new(0x1234)), Ok(()));
    let mote = mote(&conn);
    assert_eq!(mote.issued_count(CommandKind::Join), 2);
    // Initial query, query after the timeout, query after the reset.
    assert_eq!(mote.issued_count(CommandKind::GetMoteStatus), 3);
    assert_eq!(mote.issued_count(CommandKind::Reset), 1);
    assert!(mote.cancels() >= 1);
}

#[test]
fn test_service_negotiation_accepts_under_grant() {
    let behavior = MoteBehavior {
        granted_service_ms: Some(5_000),
        ..MoteBehavior::default()
    };
    let (mut conn, _clock) = setup(behavior);

    let network = NetworkConfig::new(0x1234).with_service_ms(1_000);
    assert_eq!(conn.connect(&network), Ok(()));
    assert_eq!(conn.granted_service_ms(), Some(5_000));
    assert_eq!(mote(&conn).issued_count(CommandKind::RequestService), 1);
    // One pending poll, then completion.
    assert_eq!(mote(&conn).issued_count(CommandKind::GetServiceInfo), 2);

    // A new interval renegotiates without rejoining.
    let network = NetworkConfig::new(0x1234).with_service_ms(2_000);
    assert_eq!(conn.connect(&network), Ok(()));
    assert_eq!(mote(&conn).issued_count(CommandKind::RequestService), 2);
    assert_eq!(mote(&conn).issued_count(CommandKind::Join), 1);
}

#[test]
fn test_new_network_id_forces_rejoin() {
    let (mut conn, _clock) = connected(MoteBehavior::default());
    assert_eq!(conn.connect(&NetworkConfig::new(0x4321)), Ok(()));
    assert_eq!(conn.network_id(), 0x4321);
    assert_eq!(mote(&conn).issued_count(CommandKind::Reset), 1);
    assert_eq!(mote(&conn).issued_count(CommandKind::Join), 2);
}

#[test]
fn test_rejected_credentials_time_out() {
    let config = QslConfig {
        connect_timeout_ms: 2_000,
        ..QslConfig::default()
    };
    let behavior = MoteBehavior {
        accepted_network_id: Some(0x9999),
        ..MoteBehavior::default()
    };
    let (mut conn, clock) = setup_with(behavior, config);

    assert_eq!(
        conn.connect(&NetworkConfig::new(0x1234)),
        Err(QslError::ConnectTimeout(2_000))
    );
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(conn.pending().is_none());
    assert!(conn.awaiting_reply().is_none());
    assert!(clock.now_ms() >= 2_000);
}

#[test]
fn test_refused_network_id_fails_connect() {
    let behavior =
        MoteBehavior::default().with_override(CommandKind::SetNetworkId, ResultCode::WriteFail, None);
    let (mut conn, _clock) = setup(behavior);
    assert_eq!(
        conn.connect(&NetworkConfig::new(0x1234)),
        Err(QslError::ConnectFailed)
    );
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(mote(&conn).issued_count(CommandKind::Join), 0);
}

#[test]
fn test_malformed_reply_fails_connect() {
    let behavior = MoteBehavior::default().with_malformed(CommandKind::OpenSocket, Some(1));
    let (mut conn, _clock) = setup(behavior);
    assert_eq!(
        conn.connect(&NetworkConfig::new(0x1234)),
        Err(QslError::ConnectFailed)
    );
    assert_eq!(conn.socket_id(), None);
}

#[test]
fn test_connect_always_settles() {
    let cases = [
        MoteBehavior::default(),
        MoteBehavior::default().with_dropped(CommandKind::GetMoteStatus, Some(2)),
        MoteBehavior::default().with_override(CommandKind::Join, ResultCode::InvalidState, Some(1)),
        MoteBehavior::default().with_override(CommandKind::BindSocket, ResultCode::Busy, Some(1)),
        MoteBehavior {
            reply_loss: 0.3,
            seed: 42,
            ..MoteBehavior::default()
        },
        MoteBehavior {
            accepted_network_id: Some(1),
            ..MoteBehavior::default()
        },
    ];
    let config = QslConfig {
        connect_timeout_ms: 10_000,
        ..QslConfig::default()
    };

    for behavior in cases {
        let (mut conn, _clock) = setup_with(behavior, config.clone());
        let result = conn.connect(&NetworkConfig::new(0x1234));
        match result {
            Ok(()) => assert_eq!(conn.state(), ConnectionState::Connected),
            Err(_) => assert_eq!(conn.state(), ConnectionState::Disconnected),
        }
    }
}

// ============================================================================
// Send
// ============================================================================

#[test]
fn test_send_delivers_datagram() {
    let (mut conn, _clock) = connected(MoteBehavior::default());
    assert_eq!(conn.send(b"hello", 0), Ok(()));
    assert_eq!(conn.state(), ConnectionState::Connected);

    let sent = mote(&conn).sent_datagrams();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload, b"hello");
    assert_eq!(sent[0].dest_port, 0xF0B8);
}

#[test]
fn test_oversized_send_is_rejected() {
    let (mut conn, _clock) = connected(MoteBehavior::default());
    let issued = mote(&conn).issued().len();
    assert_eq!(
        conn.send(&[0u8; 200], 1000),
        Err(QslError::PayloadTooLarge {
            size: 200,
            limit: 87
        })
    );
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(mote(&conn).issued().len(), issued);
}

#[test]
fn test_refused_send_returns_to_connected() {
    let behavior =
        MoteBehavior::default().with_override(CommandKind::SendTo, ResultCode::NoResources, Some(1));
    let (mut conn, _clock) = connected(behavior);

    assert_eq!(conn.send(b"one", 0), Err(QslError::SendFailed));
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.send(b"two", 0), Ok(()));
    assert_eq!(mote(&conn).sent_datagrams().len(), 1);
}

#[test]
fn test_unanswered_send_times_out() {
    let config = QslConfig {
        send_timeout_ms: 200,
        ..QslConfig::default()
    };
    let behavior = MoteBehavior::default().with_dropped(CommandKind::SendTo, Some(1));
    let (mut conn, _clock) = setup_with(behavior, config);
    conn.connect(&NetworkConfig::new(0x1234)).expect("connect");

    assert_eq!(conn.send(b"lost", 0), Err(QslError::SendTimeout(200)));
    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.send(b"found", 0), Ok(()));
}

#[test]
fn test_send_requires_connection() {
    let (mut conn, _clock) = setup(MoteBehavior::default());
    assert_eq!(conn.send(b"x", 0), Err(QslError::NotConnected));
}

// ============================================================================
// Lost Sync
// ============================================================================

#[test]
fn test_reboot_while_connected_disconnects() {
    let (mut conn, _clock) = connected(MoteBehavior::default());
    conn.adapter_mut().reboot();
    conn.step();
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.send(b"x", 0), Err(QslError::NotConnected));

    assert_eq!(conn.connect(&NetworkConfig::new(0x1234)), Ok(()));
    assert_eq!(mote(&conn).issued_count(CommandKind::Join), 2);
    assert_eq!(mote(&conn).issued_count(CommandKind::Reset), 0);
}

#[test]
fn test_lost_network_resets_on_reconnect() {
    let (mut conn, _clock) = connected(MoteBehavior::default());
    conn.adapter_mut().lose_network();
    conn.step();
    // The mote reported searching, not idle: the disconnected event bit alone
    // dropped the session.
    assert_eq!(mote(&conn).state(), MoteState::Searching);
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    // The mote is still searching, so the handshake resets it first.
    assert_eq!(conn.connect(&NetworkConfig::new(0x1234)), Ok(()));
    assert_eq!(mote(&conn).issued_count(CommandKind::Reset), 1);
}

// ============================================================================
// Receive
// ============================================================================

#[test]
fn test_received_datagrams_are_read_in_order() {
    let (mut conn, _clock) = connected(MoteBehavior::default());
    for payload in [&b"first"[..], b"second", b"third"] {
        conn.adapter_mut().inject_datagram(payload, 0xF0B8);
    }
    conn.step();
    assert_eq!(conn.inbox_len(), 3);

    let mut buf = [0u8; 90];
    for expected in [&b"first"[..], b"second", b"third"] {
        let len = conn.read(&mut buf);
        assert_eq!(&buf[..len], expected);
    }
    assert_eq!(conn.read(&mut buf), 0);
}

#[test]
fn test_inbox_keeps_oldest_when_full() {
    let (mut conn, _clock) = connected(MoteBehavior::default());
    for i in 0..12u8 {
        conn.adapter_mut().inject_datagram(&[i], 0xF0B8);
    }
    conn.step();
    assert_eq!(conn.inbox_len(), 10);

    let mut buf = [0u8; 4];
    let first = conn.read(&mut buf);
    assert_eq!(&buf[..first], &[0]);
}

#[test]
fn test_loopback_echo_lands_in_inbox() {
    let (mut conn, clock) = connected(MoteBehavior {
        loopback: true,
        ..MoteBehavior::default()
    });
    assert_eq!(conn.send(b"ping", 0), Ok(()));
    clock.advance(10);
    conn.step();

    let mut buf = [0u8; 16];
    let len = conn.read(&mut buf);
    assert_eq!(&buf[..len], b"ping");
}
