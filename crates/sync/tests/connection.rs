use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rpgsync::net::{Received, rand_u64};
use rpgsync::{
    BaseData, Body, Channel, ConnectionManager, ConnectionState, CurrentSnapshot, EntityId,
    EntityKind, NetworkEndpoint, PacketFlags, PacketType,
};
use rpgsync::snapshot::CurrentEntry;

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn pair() -> (NetworkEndpoint, NetworkEndpoint) {
    let port = next_port();
    let server = NetworkEndpoint::bind(("127.0.0.1", port)).unwrap();
    let client = NetworkEndpoint::bind(("127.0.0.1", port + 1)).unwrap();
    (server, client)
}

fn wait_for_packets(endpoint: &mut NetworkEndpoint, timeout_ms: u64) -> Option<Vec<Received>> {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        let received = endpoint.receive().unwrap();
        if !received.is_empty() {
            return Some(received);
        }
        thread::sleep(Duration::from_millis(1));
    }
    None
}

fn send(
    endpoint: &mut NetworkEndpoint,
    channel: &mut Channel,
    payload: PacketType,
    flags: PacketFlags,
    to: SocketAddr,
) {
    endpoint.send(channel, payload, 0, flags, to).unwrap();
}

#[test]
fn test_connection_handshake_full_flow() {
    let (mut server, mut client) = pair();
    let server_addr = server.local_addr();
    let mut connections = ConnectionManager::new(4);
    let mut client_channel = Channel::new();
    let client_salt = rand_u64();

    send(
        &mut client,
        &mut client_channel,
        PacketType::ConnectionRequest {
            client_salt,
            session_token: None,
        },
        PacketFlags::empty(),
        server_addr,
    );

    let received = wait_for_packets(&mut server, 200).expect("No packet received");
    assert_eq!(received.len(), 1);
    let from = received[0].addr;
    let PacketType::ConnectionRequest { client_salt: salt, .. } = received[0].packet.payload
    else {
        panic!("Expected ConnectionRequest");
    };
    assert_eq!(salt, client_salt);

    let pending = connections.get_or_create_pending(from, salt, None).unwrap();
    assert_eq!(pending.state, ConnectionState::Connecting);
    let challenge = PacketType::ConnectionChallenge {
        server_salt: pending.server_salt,
        challenge: pending.combined_salt(),
    };
    server
        .send(&mut pending.channel, challenge, 0, PacketFlags::empty(), from)
        .unwrap();

    let received = wait_for_packets(&mut client, 200).expect("No challenge received");
    let PacketType::ConnectionChallenge {
        server_salt,
        challenge,
    } = received[0].packet.payload
    else {
        panic!("Expected ConnectionChallenge");
    };
    assert_eq!(challenge, client_salt ^ server_salt);

    send(
        &mut client,
        &mut client_channel,
        PacketType::ChallengeResponse {
            combined_salt: client_salt ^ server_salt,
        },
        PacketFlags::RELIABLE,
        server_addr,
    );

    let received = wait_for_packets(&mut server, 200).expect("No response received");
    assert!(received[0].flags.contains(PacketFlags::RELIABLE));
    let PacketType::ChallengeResponse { combined_salt } = received[0].packet.payload else {
        panic!("Expected ChallengeResponse");
    };

    let conn = connections.get_by_addr_mut(&from).unwrap();
    assert!(conn.channel.accept(&received[0].packet.header));
    assert_eq!(combined_salt, conn.combined_salt());
    conn.state = ConnectionState::Connected;
    let accepted = PacketType::ConnectionAccepted {
        client_id: conn.client_id,
        player_id: conn.player_id,
        session_token: conn.session_token,
        resumed: false,
    };
    server
        .send(&mut conn.channel, accepted, 0, PacketFlags::RELIABLE, from)
        .unwrap();

    let received = wait_for_packets(&mut client, 200).expect("No accept received");
    match &received[0].packet.payload {
        PacketType::ConnectionAccepted {
            client_id, resumed, ..
        } => {
            assert_eq!(*client_id, 1);
            assert!(!resumed);
        }
        other => panic!("Expected ConnectionAccepted, got {:?}", other.tag()),
    }
    assert_eq!(connections.connected_count(), 1);

    // the accept carries the ack for the challenge response
    assert!(client_channel.accept(&received[0].packet.header));
    assert_eq!(client_channel.unacked_reliable(), 0);
}

#[test]
fn test_connection_denied_server_full() {
    let (mut server, mut client) = pair();
    let mut connections = ConnectionManager::new(1);
    let mut channel = Channel::new();

    let first: SocketAddr = "127.0.0.1:1".parse().unwrap();
    connections.get_or_create_pending(first, 1, None).unwrap();

    send(
        &mut client,
        &mut channel,
        PacketType::ConnectionRequest {
            client_salt: 2,
            session_token: None,
        },
        PacketFlags::empty(),
        server.local_addr(),
    );
    let received = wait_for_packets(&mut server, 200).expect("No packet received");
    let from = received[0].addr;

    let reason = connections
        .get_or_create_pending(from, 2, None)
        .err()
        .expect("Should be full");
    let mut reply = Channel::new();
    server
        .send(
            &mut reply,
            PacketType::ConnectionDenied {
                reason: reason.to_string(),
            },
            0,
            PacketFlags::empty(),
            from,
        )
        .unwrap();

    let received = wait_for_packets(&mut client, 200).expect("No denial received");
    assert_eq!(
        received[0].packet.payload,
        PacketType::ConnectionDenied {
            reason: "Server full".into()
        }
    );
}

#[test]
fn test_challenge_binds_both_salts() {
    let mut connections = ConnectionManager::new(4);
    let addr: SocketAddr = "127.0.0.1:2".parse().unwrap();

    let conn = connections.get_or_create_pending(addr, 12345, None).unwrap();
    let server_salt = conn.server_salt;
    assert_eq!(conn.combined_salt(), 12345 ^ server_salt);
    assert_eq!(conn.state, ConnectionState::Connecting);

    // a repeated request keeps the pending salts
    let again = connections.get_or_create_pending(addr, 999, None).unwrap();
    assert_eq!(again.server_salt, server_salt);
    assert_eq!(again.client_salt, 12345);
    assert_eq!(connections.connected_count(), 0);
    assert_eq!(connections.total_count(), 1);
}

#[test]
fn test_ping_pong() {
    let (mut server, mut client) = pair();
    let mut client_channel = Channel::new();
    let mut server_channel = Channel::new();

    send(
        &mut client,
        &mut client_channel,
        PacketType::Ping { timestamp: 77 },
        PacketFlags::empty(),
        server.local_addr(),
    );
    let received = wait_for_packets(&mut server, 200).expect("No ping received");
    let PacketType::Ping { timestamp } = received[0].packet.payload else {
        panic!("Expected Ping");
    };
    assert!(server_channel.accept(&received[0].packet.header));

    send(
        &mut server,
        &mut server_channel,
        PacketType::Pong { timestamp },
        PacketFlags::empty(),
        received[0].addr,
    );
    let received = wait_for_packets(&mut client, 200).expect("No pong received");
    assert_eq!(received[0].packet.payload, PacketType::Pong { timestamp: 77 });
}

#[test]
fn test_world_snapshot_transmission() {
    let (mut server, mut client) = pair();
    let mut channel = Channel::new();

    let current = CurrentSnapshot {
        entries: (0..4)
            .map(|index| CurrentEntry {
                base: BaseData::new(EntityId::new(EntityKind::Enemy, 0, index)),
                tick: 120,
                body: Body::new(12, 0).with_hp(40, 40),
            })
            .collect(),
    };

    send(
        &mut server,
        &mut channel,
        PacketType::WorldSnapshot(current.to_wire(120)),
        PacketFlags::RELIABLE | PacketFlags::KEYFRAME,
        client.local_addr(),
    );

    let received = wait_for_packets(&mut client, 200).expect("No snapshot received");
    assert!(received[0].flags.contains(PacketFlags::KEYFRAME));
    assert_eq!(received[0].packet.header.tick, 0);
    let PacketType::WorldSnapshot(snapshot) = &received[0].packet.payload else {
        panic!("Expected WorldSnapshot");
    };
    assert_eq!(snapshot.tick, 120);
    assert_eq!(snapshot.enemies.len(), 4);
    assert_eq!(snapshot.present_ids(), Some(Vec::new()));
}

#[test]
fn test_disconnect_packet() {
    let (mut server, mut client) = pair();
    let mut connections = ConnectionManager::new(4);
    let mut channel = Channel::new();

    let from = client.local_addr();
    connections.get_or_create_pending(from, 1, None).unwrap();

    send(
        &mut client,
        &mut channel,
        PacketType::Disconnect,
        PacketFlags::empty(),
        server.local_addr(),
    );
    let received = wait_for_packets(&mut server, 200).expect("No disconnect received");
    assert_eq!(received[0].packet.payload, PacketType::Disconnect);

    assert!(connections.remove_by_addr(&received[0].addr).is_some());
    assert_eq!(connections.total_count(), 0);
}

#[test]
fn test_packet_sequence_numbers() {
    let mut a = Channel::new();
    let mut b = Channel::new();

    let first = a.next_packet(PacketType::RequestFull, 0);
    let second = a.next_packet(PacketType::RequestFull, 0);
    let other = b.next_packet(PacketType::RequestFull, 0);

    assert_eq!(first.header.sequence, 1);
    assert_eq!(second.header.sequence, 2);
    assert_eq!(other.header.sequence, 1);
}

#[test]
fn test_multiple_clients_connect() {
    let mut connections = ConnectionManager::new(8);

    let mut ids = Vec::new();
    for port in 0..5 {
        let addr: SocketAddr = format!("127.0.0.1:{}", 5000 + port).parse().unwrap();
        let conn = connections.get_or_create_pending(addr, port as u64, None).unwrap();
        conn.state = ConnectionState::Connected;
        ids.push((conn.client_id, conn.player_id));
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
    assert_eq!(connections.connected_count(), 5);
}

#[test]
fn test_receive_tracker_zero_sequence() {
    let mut channel = Channel::new();
    let packet = Channel::new().next_packet(PacketType::RequestFull, 0);

    assert!(channel.accept(&packet.header));
    assert!(!channel.accept(&packet.header));
}
