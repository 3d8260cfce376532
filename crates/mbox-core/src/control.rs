//! Fixed-period control loop driving the readback from the staged settings.
//!
//! One iteration:
//!
//! 1. Fetch the readback and advance the iteration count
//! 2. Fill telemetry and stamp the iteration
//! 3. Fetch the settings together with their marks; a marked schedule is
//!    copied into `bookKeeping.nextApplyAfter`
//! 4. Evaluate the deferred gate and commit the staged set-points if due
//! 5. Post the readback, then acknowledge the consumed batch
//!
//! The loop is the only writer of the readback record. Writes that reach the
//! settings while an iteration is in progress stay marked and are picked up
//! by the next one.

use crate::gate::{self, GateDecision};
use crate::mailbox::{Mailbox, Producer};
use crate::record::{Readback, Settings, Stamp, NEXT_APPLY_AFTER, STEERERS};
use crate::service::Service;
use crate::shutdown::Shutdown;
use mbox_common::config::{ApplyPolicy, MailboxConfig};
use mbox_common::error::MboxResult;
use mbox_common::metrics::LoopMetrics;
use mbox_common::time::Timestamp;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// Source of the per-iteration measurements published in the readback.
pub trait Telemetry: Send {
    /// Fill the measured parts of `record` for iteration `count`.
    fn fill(&mut self, record: &mut Readback, count: u64);
}

/// Telemetry that leaves the record untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTelemetry;

impl Telemetry for NoTelemetry {
    fn fill(&mut self, _record: &mut Readback, _count: u64) {}
}

/// The pair of records a control loop works on.
#[derive(Debug, Clone)]
pub struct Records {
    /// Read-only authoritative record (`<prefix>:rbk`).
    pub readback: Mailbox<Readback>,
    /// Writable command record (`<prefix>:set`).
    pub settings: Mailbox<Settings>,
}

impl Records {
    /// Create and open both records at `now`.
    ///
    /// The settings start out mirroring the readback and accept external writes.
    ///
    /// # Errors
    ///
    /// Propagates open and handler registration failures.
    pub fn open(config: &MailboxConfig, now: Timestamp) -> MboxResult<Self> {
        let initial = Readback::starting_at(now);
        let readback = Mailbox::with_capacity(config.readback_name(), config.observer_capacity);
        let settings = Mailbox::with_capacity(config.settings_name(), config.observer_capacity);
        settings.open(Settings::from_readback(&initial))?;
        settings.accept_writes()?;
        readback.open(initial)?;
        Ok(Self { readback, settings })
    }

    /// Publish both records on `service`.
    ///
    /// # Errors
    ///
    /// [`mbox_common::MboxError::DuplicateRecord`] if a name is taken.
    pub fn register(&self, service: &Service) -> MboxResult<()> {
        service.register_record(self.readback.clone())?;
        service.register_record(self.settings.clone())
    }

    /// A loop builder over these records.
    #[must_use]
    pub fn control_loop(&self) -> ControlLoopBuilder {
        ControlLoopBuilder::new(self.readback.producer(), self.settings.producer())
    }
}

/// What one iteration did.
#[derive(Debug, Clone)]
pub struct Iteration {
    /// Iteration count after this iteration.
    pub count: u64,
    /// Settings leaves consumed by this iteration.
    pub dirty: Vec<String>,
    /// Gate outcome.
    pub decision: GateDecision,
    /// Whether staged set-points were committed.
    pub applied: bool,
    /// The posted readback.
    pub record: Readback,
}

/// Periodic producer of the readback record.
pub struct ControlLoop {
    readback: Producer<Readback>,
    settings: Producer<Settings>,
    telemetry: Box<dyn Telemetry>,
    policy: ApplyPolicy,
    period: Duration,
    max_cycles: u64,
    count: u64,
    metrics: LoopMetrics,
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("readback", &self.readback.name())
            .field("settings", &self.settings.name())
            .field("policy", &self.policy)
            .field("period", &self.period)
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}

impl ControlLoop {
    /// Iterations completed.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Loop period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Running statistics.
    #[must_use]
    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    /// Run one iteration as of `now`.
    ///
    /// # Errors
    ///
    /// Record lifecycle errors, or a timestamp ordering violation. Either
    /// leaves the loop unable to continue.
    pub fn iterate(&mut self, now: Timestamp) -> MboxResult<Iteration> {
        let started = Instant::now();

        let mut record = self.readback.fetch()?;
        self.count += 1;
        let count = self.count;

        self.telemetry.fill(&mut record, count);
        record.time_stamp = now;
        record.book_keeping.count = count;
        record.book_keeping.last = Stamp {
            when: now,
            at_count: count,
        };

        let batch = self.settings.fetch_marked()?;
        if batch.has_changes() {
            debug!(count, dirty = ?batch.dirty, "Consuming staged settings");
        }
        if batch.is_dirty(NEXT_APPLY_AFTER) {
            let schedule = batch.value.schedule();
            match schedule {
                Some(due) => debug!(%due, "Apply scheduled"),
                None => debug!("Pending apply cancelled"),
            }
            record.book_keeping.next_apply_after = schedule;
        }

        let decision = gate::evaluate(record.book_keeping.next_apply_after, now)?;
        let late_by = match decision {
            GateDecision::Due { late_by, .. } => Some(late_by),
            GateDecision::NotScheduled
                if self.policy == ApplyPolicy::Immediate && batch.is_dirty(STEERERS) =>
            {
                Some(Timestamp::UNSET)
            }
            _ => None,
        };

        let applied = late_by.is_some();
        if let Some(late_by) = late_by {
            record.apply(&batch.value);
            gate::commit(&mut record.book_keeping, now, count);
            self.metrics.record_apply(late_by.as_duration());
            info!(
                count,
                x = record.steerers.x,
                y = record.steerers.y,
                "applied after {} s {} ms",
                late_by.seconds,
                late_by.nanoseconds / 1_000_000
            );
        }

        self.readback.post(record.clone())?;
        if batch.has_changes() {
            self.settings.acknowledge(&batch);
        }
        self.metrics
            .record_iteration(started.elapsed(), batch.has_changes());

        trace!(count, ?decision, applied, "Iteration complete");

        Ok(Iteration {
            count,
            dirty: batch.dirty,
            decision,
            applied,
            record,
        })
    }

    /// Iterate once per period until `shutdown` fires or `max_cycles` is reached.
    ///
    /// Reaching `max_cycles` triggers `shutdown` so other contexts stop too.
    ///
    /// # Errors
    ///
    /// The first failed iteration. Shutdown is triggered before returning.
    pub fn run(&mut self, shutdown: &Shutdown) -> MboxResult<()> {
        self.run_with(shutdown, |_, _| {})
    }

    /// Like [`run`](Self::run), handing every completed iteration and the
    /// running statistics to `on_iteration`.
    ///
    /// # Errors
    ///
    /// The first failed iteration. Shutdown is triggered before returning.
    pub fn run_with<F>(&mut self, shutdown: &Shutdown, mut on_iteration: F) -> MboxResult<()>
    where
        F: FnMut(&Iteration, &LoopMetrics),
    {
        info!(
            readback = %self.readback.name(),
            settings = %self.settings.name(),
            period = ?self.period,
            policy = ?self.policy,
            "Entering control loop"
        );

        while !shutdown.wait(self.period) {
            match self.iterate(Timestamp::now()) {
                Ok(it) => on_iteration(&it, &self.metrics),
                Err(e) => {
                    error!(count = self.count, error = %e, "Control loop iteration failed");
                    shutdown.trigger();
                    return Err(e);
                }
            }
            if self.max_cycles != 0 && self.count >= self.max_cycles {
                info!(cycles = self.count, "Maximum cycles reached");
                shutdown.trigger();
                break;
            }
        }

        info!(
            iterations = self.count,
            applies = self.metrics.applies(),
            "Control loop exited"
        );
        Ok(())
    }
}

/// Builder for [`ControlLoop`].
pub struct ControlLoopBuilder {
    readback: Producer<Readback>,
    settings: Producer<Settings>,
    telemetry: Box<dyn Telemetry>,
    config: MailboxConfig,
}

impl ControlLoopBuilder {
    /// Create a builder over the two record producers with default settings.
    #[must_use]
    pub fn new(readback: Producer<Readback>, settings: Producer<Settings>) -> Self {
        Self {
            readback,
            settings,
            telemetry: Box::new(NoTelemetry),
            config: MailboxConfig::default(),
        }
    }

    /// Set the loop period.
    #[must_use]
    pub fn period(mut self, period: Duration) -> Self {
        self.config.period = period;
        self
    }

    /// Set the apply policy.
    #[must_use]
    pub fn policy(mut self, policy: ApplyPolicy) -> Self {
        self.config.apply_policy = policy;
        self
    }

    /// Stop after `max` iterations (0 = unbounded).
    #[must_use]
    pub fn max_cycles(mut self, max: u64) -> Self {
        self.config.max_cycles = max;
        self
    }

    /// Set the telemetry source.
    #[must_use]
    pub fn telemetry(mut self, telemetry: impl Telemetry + 'static) -> Self {
        self.telemetry = Box::new(telemetry);
        self
    }

    /// Take period, policy and cycle limit from a configuration.
    #[must_use]
    pub fn config(mut self, config: &MailboxConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Build the loop.
    #[must_use]
    pub fn build(self) -> ControlLoop {
        ControlLoop {
            readback: self.readback,
            settings: self.settings,
            telemetry: self.telemetry,
            policy: self.config.apply_policy,
            period: self.config.period,
            max_cycles: self.config.max_cycles,
            count: 0,
            metrics: LoopMetrics::new(self.config.period),
        }
    }
}
