//! Deferred apply acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A write without a schedule is consumed but not applied
//! - A scheduled write is applied on the first iteration strictly after its due-time
//! - The schedule is one-shot and resets after the apply
//! - `bookKeeping.count` advances by exactly one per iteration

use super::common::{at, Harness};
use mbox_common::config::ApplyPolicy;
use mbox_common::error::MboxError;
use mbox_common::time::Timestamp;
use mbox_core::gate::GateDecision;
use mbox_core::record::Stamp;
use mbox_core::value::{FieldValue, Put};

#[test]
fn test_write_without_schedule_is_consumed_only() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let mut control = harness.control_loop();
    control.iterate(at(1)).unwrap();
    let before = harness.records.readback.fetch().unwrap();

    let handle = harness.thread.handle();
    let ack = handle
        .put(&harness.settings_name(), Put::new().field("steerers.x", 5.0))
        .unwrap();
    assert!(ack.is_complete());
    assert!(harness.records.settings.is_marked("steerers.x", false));

    control.iterate(at(2)).unwrap();

    assert!(!harness.records.settings.is_marked("steerers.x", false));
    let after = harness.records.readback.fetch().unwrap();
    assert_eq!(after.book_keeping.count, before.book_keeping.count + 1);
    assert_eq!(after.book_keeping.last_applied, before.book_keeping.last_applied);
    assert_eq!(after.steerers, before.steerers);
}

#[test]
fn test_scheduled_write_applies_after_due_time() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let mut control = harness.control_loop();
    let handle = harness.thread.handle();

    handle
        .put(
            &harness.settings_name(),
            Put::new()
                .field("steerers.x", 5.0)
                .field("nextApplyAfter", at(2)),
        )
        .unwrap();

    let pending = control.iterate(at(1)).unwrap();
    assert_eq!(pending.decision, GateDecision::Pending { due: at(2) });
    assert_eq!(pending.record.steerers.x, 0.0);

    let applied = control.iterate(at(3)).unwrap();
    assert!(applied.applied);

    let snapshot = handle.fetch(&harness.readback_name()).unwrap();
    assert_eq!(snapshot.get("steerers.x"), Some(&FieldValue::Float64(5.0)));
    assert_eq!(
        snapshot.get("bookKeeping.nextApplyAfter.secondsPastEpoch"),
        Some(&FieldValue::UInt64(0))
    );
    assert_eq!(
        snapshot.get("bookKeeping.lastApplied.atCount"),
        snapshot.get("bookKeeping.count")
    );

    let later = control.iterate(at(4)).unwrap();
    assert_eq!(later.decision, GateDecision::NotScheduled);
    assert_eq!(
        later.record.book_keeping.last_applied,
        Stamp {
            when: at(3),
            at_count: applied.count,
        }
    );
}

#[test]
fn test_due_time_equal_to_now_waits() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let mut control = harness.control_loop();
    harness
        .service
        .put(
            &harness.settings_name(),
            Put::new()
                .field("steerers.y", 1.0)
                .field("nextApplyAfter", at(2)),
        )
        .unwrap();

    assert!(!control.iterate(at(2)).unwrap().applied);
    let late = control
        .iterate(Timestamp::new(at(2).seconds, 1))
        .unwrap();
    assert!(late.applied);
    assert_eq!(late.record.steerers.y, 1.0);
}

#[test]
fn test_schedule_by_leaf_fields() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let mut control = harness.control_loop();
    harness
        .service
        .put(
            &harness.settings_name(),
            Put::new()
                .field("steerers.x", -3.0)
                .field("nextApplyAfter.secondsPastEpoch", at(10).seconds)
                .field("nextApplyAfter.nanoseconds", 500_000_000u32),
        )
        .unwrap();

    let pending = control.iterate(at(10)).unwrap();
    assert_eq!(
        pending.record.book_keeping.next_apply_after,
        Some(Timestamp::new(at(10).seconds, 500_000_000))
    );
    assert!(!pending.applied);
    assert!(control.iterate(at(11)).unwrap().applied);
    assert_eq!(control.metrics().applies(), 1);
}

#[test]
fn test_immediate_policy() {
    let harness = Harness::new(ApplyPolicy::Immediate);
    let mut control = harness.control_loop();
    harness
        .thread
        .handle()
        .put(&harness.settings_name(), Put::new().field("steerers.y", 2.0))
        .unwrap();

    let it = control.iterate(at(1)).unwrap();
    assert!(it.applied);
    assert_eq!(it.record.steerers.y, 2.0);
    assert_eq!(it.record.book_keeping.last_applied.at_count, it.count);
}

#[test]
fn test_count_advances_once_per_iteration() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let mut control = harness.control_loop();
    for n in 1..=5 {
        let it = control.iterate(at(n)).unwrap();
        assert_eq!(it.count, n);
        assert_eq!(it.record.book_keeping.last.at_count, n);
        assert_eq!(it.record.book_keeping.last.when, at(n));
    }
}

#[test]
fn test_schedule_with_sub_second_overflow_is_rejected() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let mut control = harness.control_loop();
    let handle = harness.thread.handle();
    let due = Timestamp {
        seconds: at(10).seconds,
        nanoseconds: 1_500_000_000,
    };

    let ack = handle
        .put(
            &harness.settings_name(),
            Put::new()
                .field("steerers.x", 5.0)
                .field("nextApplyAfter", due),
        )
        .unwrap();
    assert_eq!(ack.accepted, vec!["steerers.x".to_string()]);
    assert_eq!(ack.ignored.len(), 1);
    assert_eq!(ack.ignored[0].0, "nextApplyAfter");
    assert!(matches!(ack.ignored[0].1, MboxError::OutOfRange { .. }));

    // Iterating across the would-be due-time keeps the loop alive.
    assert_eq!(control.iterate(at(9)).unwrap().decision, GateDecision::NotScheduled);
    let it = control.iterate(at(11)).unwrap();
    assert_eq!(it.decision, GateDecision::NotScheduled);
    assert!(!it.applied);
    assert_eq!(it.record.steerers.x, 0.0);
}

#[test]
fn test_nanoseconds_leaf_overflow_keeps_service_running() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let mut control = harness.control_loop();
    let handle = harness.thread.handle();
    let name = harness.settings_name();

    handle
        .put(&name, Put::new().field("nextApplyAfter.secondsPastEpoch", u64::MAX))
        .unwrap();
    let ack = handle
        .put(&name, Put::new().field("nextApplyAfter.nanoseconds", 2_000_000_000u32))
        .unwrap();
    assert!(ack.accepted.is_empty());
    assert_eq!(ack.ignored[0].0, "nextApplyAfter.nanoseconds");
    assert!(matches!(ack.ignored[0].1, MboxError::OutOfRange { .. }));

    let ack = handle
        .put(&name, Put::new().field("nextApplyAfter.nanoseconds", 999_999_999u32))
        .unwrap();
    assert!(ack.is_complete());
    assert_eq!(
        harness.service.fetch_current(&name).unwrap().get("nextApplyAfter.nanoseconds"),
        Some(&FieldValue::UInt32(999_999_999))
    );

    let it = control.iterate(at(1)).unwrap();
    assert_eq!(
        it.record.book_keeping.next_apply_after,
        Some(Timestamp::new(u64::MAX, 999_999_999))
    );
    assert!(!it.applied);
}
