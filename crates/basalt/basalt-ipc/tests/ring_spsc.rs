//! Ring buffer contract tests: FIFO integrity, back-pressure, session
//! staleness, and role exclusivity.

use std::sync::atomic::{AtomicU32, Ordering};

use basalt_ipc::{Consumer, IpcError, LockError, Producer, MAX_MSG_SIZE};
use proptest::prelude::*;

static QUEUE_SEQ: AtomicU32 = AtomicU32::new(0);

fn unique_queue(tag: &str) -> String {
    format!(
        "basalt_ring_{tag}_{}_{}",
        std::process::id(),
        QUEUE_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

#[test]
fn write_then_read_roundtrip() {
    let queue = unique_queue("rt");
    let mut producer = Producer::create(&queue, 64).expect("producer");
    let mut consumer = Consumer::open(&queue).expect("consumer");

    assert!(producer.write(b"hello ring"));

    let mut buf = [0u8; MAX_MSG_SIZE];
    let n = consumer.read(&mut buf);
    assert_eq!(&buf[..n as usize], b"hello ring");

    // Drained.
    assert_eq!(consumer.read(&mut buf), 0);
}

#[test]
fn back_pressure_full_ring() {
    let queue = unique_queue("full");
    let mut producer = Producer::create(&queue, 8).expect("producer");
    let mut consumer = Consumer::open(&queue).expect("consumer");

    for i in 0..8u8 {
        assert!(producer.write(&[i]), "write {i} should fit");
    }
    // capacity+1-th write fails and leaves the ring untouched.
    assert!(!producer.write(b"overflow"));

    let mut buf = [0u8; 16];
    assert_eq!(consumer.read(&mut buf), 1);
    assert_eq!(buf[0], 0);

    // One slot freed, the next write succeeds.
    assert!(producer.write(b"again"));
}

#[test]
fn oversize_message_rejected() {
    let queue = unique_queue("oversize");
    let mut producer = Producer::create(&queue, 8).expect("producer");
    let huge = vec![0u8; MAX_MSG_SIZE + 1];
    assert!(!producer.write(&huge));
    // A max-size message is still accepted.
    let max = vec![0u8; MAX_MSG_SIZE];
    assert!(producer.write(&max));
}

#[test]
fn short_reader_buffer_truncates_silently() {
    let queue = unique_queue("trunc");
    let mut producer = Producer::create(&queue, 8).expect("producer");
    let mut consumer = Consumer::open(&queue).expect("consumer");

    assert!(producer.write(b"0123456789"));
    let mut small = [0u8; 4];
    let n = consumer.read(&mut small);
    assert_eq!(n, 4);
    assert_eq!(&small, b"0123");

    // The slot is consumed despite the truncation.
    let mut buf = [0u8; 16];
    assert_eq!(consumer.read(&mut buf), 0);
}

#[test]
fn producer_role_is_exclusive() {
    let queue = unique_queue("prod_excl");
    let _producer = Producer::create(&queue, 8).expect("first producer");
    let err = Producer::create(&queue, 8)
        .err()
        .expect("second producer must fail");
    assert!(
        matches!(
            err,
            IpcError::Lock(LockError::AlreadyHeld { role: "producer", .. })
        ),
        "expected producer role conflict, got {err:?}"
    );
}

#[test]
fn consumer_role_is_exclusive() {
    let queue = unique_queue("cons_excl");
    let _producer = Producer::create(&queue, 8).expect("producer");
    let _consumer = Consumer::open(&queue).expect("first consumer");
    let err = Consumer::open(&queue)
        .err()
        .expect("second consumer must fail");
    assert!(
        matches!(
            err,
            IpcError::Lock(LockError::AlreadyHeld { role: "consumer", .. })
        ),
        "expected consumer role conflict, got {err:?}"
    );
}

#[test]
fn stale_session_detected() {
    let queue = unique_queue("stale");
    let producer = Producer::create(&queue, 8).expect("producer");
    drop(producer);

    // Simulate a producer crash followed by an unrelated session claiming the
    // uuid file: the segment still carries the dead session's uuid.
    let uuid_path = format!("/tmp/{queue}.uuid");
    std::fs::write(&uuid_path, "00000000-0000-0000-0000-000000000000").expect("corrupt uuid");

    let err = Consumer::open(&queue)
        .err()
        .expect("consumer must reject the stale segment");
    assert!(
        matches!(err, IpcError::StaleSession { .. }),
        "expected stale session, got {err:?}"
    );
}

#[test]
fn crash_recovery_hands_over_to_fresh_session() {
    let queue = unique_queue("crash");

    let first_uuid;
    {
        let mut p1 = Producer::create(&queue, 64).expect("producer 1");
        first_uuid = p1.session_uuid();
        assert!(p1.write(b"PROD1"));

        let mut c1 = Consumer::open(&queue).expect("consumer 1");
        assert_eq!(c1.session_uuid(), first_uuid);
        let mut buf = [0u8; 16];
        let n = c1.read(&mut buf);
        assert_eq!(&buf[..n as usize], b"PROD1");
    }
    // Producer 1 "crashes"; its segment and uuid file linger.

    let mut p2 = Producer::create(&queue, 64).expect("producer 2");
    assert_ne!(p2.session_uuid(), first_uuid, "new session must differ");
    assert!(p2.write(b"PROD2"));

    let mut c2 = Consumer::open(&queue).expect("consumer 2");
    assert_eq!(c2.session_uuid(), p2.session_uuid());
    let mut buf = [0u8; 16];
    let n = c2.read(&mut buf);
    assert_eq!(&buf[..n as usize], b"PROD2");
}

#[test]
fn bad_capacity_rejected() {
    let queue = unique_queue("cap");
    assert!(matches!(
        Producer::create(&queue, 0),
        Err(IpcError::InvalidCapacity(0))
    ));
    assert!(matches!(
        Producer::create(&queue, 1 << 31),
        Err(IpcError::InvalidCapacity(_))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every successful read returns the earliest unread successful write,
    /// byte for byte, for arbitrary message sequences and drain points.
    #[test]
    fn fifo_integrity(
        messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..128), 1..64),
        drain_every in 1usize..8,
    ) {
        let queue = unique_queue("prop");
        let mut producer = Producer::create(&queue, 8).expect("producer");
        let mut consumer = Consumer::open(&queue).expect("consumer");

        let mut expected = std::collections::VecDeque::new();
        let mut buf = vec![0u8; MAX_MSG_SIZE];

        for (i, msg) in messages.iter().enumerate() {
            if !producer.write(msg) {
                // Ring full: drain one and retry; the retried write must fit.
                let n = consumer.read(&mut buf);
                let front: Vec<u8> = expected.pop_front().expect("full ring implies pending reads");
                prop_assert_eq!(&buf[..n as usize], &front[..]);
                prop_assert!(producer.write(msg));
            }
            expected.push_back(msg.clone());

            if i % drain_every == 0 {
                if let Some(front) = expected.pop_front() {
                    let n = consumer.read(&mut buf);
                    prop_assert_eq!(&buf[..n as usize], &front[..]);
                }
            }
        }

        while let Some(front) = expected.pop_front() {
            let n = consumer.read(&mut buf);
            prop_assert_eq!(&buf[..n as usize], &front[..]);
        }
        prop_assert_eq!(consumer.read(&mut buf), 0);
    }
}
