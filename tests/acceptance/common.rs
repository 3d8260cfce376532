//! Common utilities for integration tests.

#![allow(dead_code)] // Not every test file uses every helper

use mbox_common::config::{ApplyPolicy, MailboxConfig};
use mbox_common::time::Timestamp;
use mbox_core::control::{ControlLoop, Records};
use mbox_core::service::{Service, ServiceThread};
use std::time::Duration;

/// Fixed epoch for deterministic iterations.
pub const T0: u64 = 1_700_000_000;

/// `T0 + seconds`.
pub fn at(seconds: u64) -> Timestamp {
    Timestamp::new(T0 + seconds, 0)
}

/// Open records, publish them and start the service thread.
pub struct Harness {
    pub config: MailboxConfig,
    pub records: Records,
    pub service: Service,
    pub thread: ServiceThread,
}

impl Harness {
    pub fn new(policy: ApplyPolicy) -> Self {
        let config = MailboxConfig {
            prefix: "test".into(),
            period: Duration::from_millis(1),
            apply_policy: policy,
            ..MailboxConfig::default()
        };
        Self::with_config(config, at(0))
    }

    pub fn with_config(config: MailboxConfig, now: Timestamp) -> Self {
        let records = Records::open(&config, now).unwrap();
        let service = Service::new();
        records.register(&service).unwrap();
        let thread = service.spawn(config.service_queue).unwrap();
        Self {
            config,
            records,
            service,
            thread,
        }
    }

    pub fn control_loop(&self) -> ControlLoop {
        self.records.control_loop().config(&self.config).build()
    }

    pub fn settings_name(&self) -> String {
        self.config.settings_name()
    }

    pub fn readback_name(&self) -> String {
        self.config.readback_name()
    }
}
