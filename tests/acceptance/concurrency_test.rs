//! Concurrent access acceptance tests.
//!
//! The control loop and external writers run on separate threads against
//! the same records.
//!
//! # Acceptance Criteria
//!
//! - The last write to a field wins
//! - A write landing between a fetch and its acknowledgement stays marked
//! - Readers never observe a record mixing two writes
//! - Every write is eventually consumed by the loop

use super::common::{at, Harness};
use mbox_common::config::ApplyPolicy;
use mbox_core::record::Settings;
use mbox_core::shutdown::Shutdown;
use mbox_core::value::Put;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_last_write_wins() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let handle = harness.thread.handle();
    let name = harness.settings_name();
    for value in [1.0, 2.0, 3.0] {
        handle
            .put(&name, Put::new().field("steerers.x", value))
            .unwrap();
    }
    assert_eq!(harness.records.settings.fetch().unwrap().steerers.x, 3.0);
}

#[test]
fn test_write_during_batch_is_not_lost() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let settings = harness.records.settings.producer();
    let handle = harness.thread.handle();
    let name = harness.settings_name();

    handle
        .put(&name, Put::new().field("steerers.x", 1.0))
        .unwrap();
    let batch = settings.fetch_marked().unwrap();

    // Lands while the loop is still working on the batch above.
    handle
        .put(&name, Put::new().field("steerers.x", 2.0))
        .unwrap();
    settings.acknowledge(&batch);

    assert!(harness.records.settings.is_marked("steerers.x", false));
    let next = settings.fetch_marked().unwrap();
    assert_eq!(next.value.steerers.x, 2.0);
    assert_eq!(next.dirty, vec!["steerers.x".to_string()]);
}

#[test]
fn test_writes_are_never_torn() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..2)
        .map(|w| {
            let handle = harness.thread.handle();
            let name = harness.settings_name();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut n = 0.0;
                while !stop.load(Ordering::Relaxed) {
                    let v = f64::from(w) * 1_000_000.0 + n;
                    handle
                        .put(&name, Put::new().field("steerers.x", v).field("steerers.y", v))
                        .unwrap();
                    n += 1.0;
                }
            })
        })
        .collect();

    let mut rx = harness.records.settings.subscribe();
    let producer = harness.records.settings.producer();
    for _ in 0..500 {
        let Settings { steerers, .. } = producer.fetch().unwrap();
        assert_eq!(steerers.x, steerers.y);
    }
    stop.store(true, Ordering::Relaxed);
    for w in writers {
        w.join().unwrap();
    }
    while let Ok(observed) = rx.try_recv() {
        assert_eq!(observed.steerers.x, observed.steerers.y);
    }
}

#[test]
fn test_loop_consumes_every_write() {
    let harness = Harness::new(ApplyPolicy::Immediate);
    let shutdown = Shutdown::new();

    let mut control = harness.control_loop();
    let loop_shutdown = shutdown.clone();
    let runner = thread::spawn(move || {
        control.run(&loop_shutdown).unwrap();
        control
    });

    let handle = harness.thread.handle();
    let name = harness.settings_name();
    for i in 1..=50u32 {
        handle
            .put(&name, Put::new().field("steerers.y", f64::from(i)))
            .unwrap();
        thread::sleep(Duration::from_micros(200));
    }

    // Let the loop drain the last write.
    let readback = harness.records.readback.clone();
    let mut applied = 0.0;
    for _ in 0..2_000 {
        applied = readback.fetch().unwrap().steerers.y;
        if applied == 50.0 {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    shutdown.trigger();
    let control = runner.join().unwrap();

    assert_eq!(applied, 50.0);
    assert!(!harness.records.settings.is_marked("", true));
    assert!(control.metrics().applies() >= 1);
    assert!(control.count() >= 1);
}

#[test]
fn test_service_thread_serializes_with_loop() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let mut control = harness.control_loop();
    let handle = harness.thread.handle();
    let name = harness.settings_name();

    let writer = thread::spawn(move || {
        for i in 0..200u32 {
            handle
                .put(&name, Put::new().field("steerers.x", f64::from(i)))
                .unwrap();
        }
    });
    for n in 1..=200 {
        control.iterate(at(n)).unwrap();
    }
    writer.join().unwrap();

    // Whatever the interleaving, the final write is either consumed or still marked.
    let final_batch = harness.records.settings.producer().fetch_marked().unwrap();
    assert_eq!(final_batch.value.steerers.x, 199.0);
    let it = control.iterate(at(201)).unwrap();
    assert_eq!(it.count, 201);
    assert!(!harness.records.settings.is_marked("", true));
}
