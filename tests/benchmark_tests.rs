//! Performance benchmarks for the codec and session registry

use server::SessionRegistry;
use shared::{Frame, Packet, Position, Snapshot};
use std::net::SocketAddr;
use std::time::Instant;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Benchmarks encoding and decoding of move frames
#[test]
fn benchmark_move_codec() {
    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let bytes = Packet::Move {
            session_id: 1,
            x: i,
            y: i,
        }
        .encode(42)
        .unwrap();
        let frame = Frame::decode(&bytes).unwrap();
        let _ = Packet::from_frame(&frame).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Move codec: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 1s for 100k iterations
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks snapshot encoding for a busy world
#[test]
fn benchmark_snapshot_encoding() {
    let positions: Snapshot = (1..=200)
        .map(|id| (id, Position::new(id as f64, id as f64 * 2.0)))
        .collect();

    let iterations = 5_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = Packet::Sync {
            positions: positions.clone(),
        }
        .encode(0)
        .unwrap();
        assert!(!bytes.is_empty());
    }

    let duration = start.elapsed();
    println!(
        "Snapshot encoding (200 sessions): {} iterations in {:?} ({:.2} us/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks auth id allocation up to the registry's capacity
#[test]
fn benchmark_allocation_under_load() {
    let registry = SessionRegistry::new(Some(7));
    let sessions = registry.capacity();
    let start = Instant::now();

    for i in 0..sessions {
        registry.allocate(addr(i as u16), "bench").unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Allocation: {} sessions in {:?} ({:.2} us/session)",
        sessions,
        duration,
        duration.as_micros() as f64 / sessions as f64
    );

    assert_eq!(registry.len(), sessions);
    assert!(registry.allocate(addr(0), "bench").is_err());
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks position updates plus the broadcast view they feed
#[test]
fn benchmark_update_and_broadcast_view() {
    let registry = SessionRegistry::new(Some(7));
    let auth_ids: Vec<u32> = (0..100)
        .map(|i| {
            let allocation = registry.allocate(addr(i), "bench").unwrap();
            registry.bind_data_address(allocation.auth_id, addr(10_000 + i));
            allocation.auth_id
        })
        .collect();

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let auth_id = auth_ids[i % auth_ids.len()];
        registry.update_position(auth_id, i as f64, i as f64);
        let (positions, targets) = registry.broadcast_view();
        assert_eq!(positions.len(), targets.len());
    }

    let duration = start.elapsed();
    println!(
        "Update + broadcast view (100 sessions): {} iterations in {:?} ({:.2} us/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 3000);
}
