//! Record lifecycle and write routing acceptance tests.

use super::common::{at, Harness};
use mbox_common::config::{ApplyPolicy, MailboxConfig};
use mbox_common::error::MboxError;
use mbox_common::time::Timestamp;
use mbox_core::control::Records;
use mbox_core::mailbox::Mailbox;
use mbox_core::Structure;
use mbox_core::record::{Readback, Settings};
use mbox_core::value::{FieldValue, Put};

#[test]
fn test_post_and_fetch_require_open() {
    let readback: Mailbox<Readback> = Mailbox::new("late:rbk");
    assert!(matches!(
        readback.post(Readback::default()),
        Err(MboxError::NotOpen(_))
    ));
    assert!(matches!(readback.fetch(), Err(MboxError::NotOpen(_))));

    readback.open(Readback::starting_at(at(0))).unwrap();
    assert_eq!(readback.fetch().unwrap().time_stamp, at(0));
}

#[test]
fn test_readback_rejects_external_writes() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let handle = harness.thread.handle();
    assert_eq!(
        handle.put(
            &harness.readback_name(),
            Put::new().field("steerers.x", 1.0)
        ),
        Err(MboxError::NoWriteHandler(harness.readback_name()))
    );
    assert_eq!(
        harness.records.readback.fetch().unwrap(),
        Readback::starting_at(at(0))
    );
}

#[test]
fn test_unknown_fields_do_not_abort_write() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let ack = harness
        .thread
        .handle()
        .put(
            &harness.settings_name(),
            Put::new()
                .field("steerers.w", 1.0)
                .field("steerers.y", 7.0),
        )
        .unwrap();

    assert_eq!(ack.accepted, vec!["steerers.y".to_string()]);
    assert_eq!(
        ack.ignored,
        vec![(
            "steerers.w".to_string(),
            MboxError::UnknownFieldPath("steerers.w".into())
        )]
    );
    assert_eq!(harness.records.settings.fetch().unwrap().steerers.y, 7.0);
}

#[test]
fn test_unknown_record() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    assert_eq!(
        harness.thread.handle().put("nope:set", Put::new()),
        Err(MboxError::UnknownRecord("nope:set".into()))
    );
}

#[test]
fn test_records_named_from_prefix() {
    let config = MailboxConfig {
        prefix: "ring".into(),
        ..MailboxConfig::default()
    };
    let harness = Harness::with_config(config, Timestamp::new(42, 0));
    assert_eq!(
        harness.service.names(),
        vec!["ring:rbk".to_string(), "ring:set".to_string()]
    );
    let settings = harness.service.fetch_current("ring:set").unwrap();
    assert_eq!(settings.get("nextApplyAfter.secondsPastEpoch"), Some(&FieldValue::UInt64(0)));
    assert_eq!(settings.fields.len(), Settings::FIELDS.len());

    assert!(matches!(
        Records::open(&harness.config, at(0))
            .unwrap()
            .register(&harness.service),
        Err(MboxError::DuplicateRecord(_))
    ));
}

#[test]
fn test_observer_sees_posts() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let mut rx = harness.records.readback.subscribe();
    let mut control = harness.control_loop();
    control.iterate(at(1)).unwrap();
    control.iterate(at(2)).unwrap();

    assert_eq!(rx.try_recv().unwrap().book_keeping.count, 1);
    assert_eq!(rx.try_recv().unwrap().book_keeping.count, 2);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_stopped_service_reports_stopped() {
    let harness = Harness::new(ApplyPolicy::Scheduled);
    let handle = harness.thread.handle();
    let name = harness.settings_name();
    harness.thread.stop();
    assert_eq!(
        handle.put(&name, Put::new().field("steerers.x", 1.0)),
        Err(MboxError::ServiceStopped)
    );
}
