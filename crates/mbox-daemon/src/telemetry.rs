//! Synthetic beam position waveforms for the demonstration loop.

use mbox_core::control::Telemetry;
use mbox_core::record::Readback;

/// Phase advance per unit of `i/n + count`.
const PHASE_STEP: f64 = 355.0 / 113.0 * 3.0;

/// Fills `bpms.x`/`bpms.y` with a cosine/sine pair that rotates every iteration.
#[derive(Debug, Clone, Copy)]
pub struct BeamTelemetry {
    event_count: usize,
}

impl BeamTelemetry {
    /// Generate `event_count` samples per plane.
    pub fn new(event_count: usize) -> Self {
        Self { event_count }
    }
}

impl Telemetry for BeamTelemetry {
    #[allow(clippy::cast_precision_loss)]
    fn fill(&mut self, record: &mut Readback, count: u64) {
        let n = self.event_count as f64;
        let cnt = count as f64;
        let (x, y): (Vec<f64>, Vec<f64>) = (0..self.event_count)
            .map(|i| {
                let phase = (i as f64 / n + cnt) * PHASE_STEP;
                (phase.cos(), phase.sin())
            })
            .unzip();
        record.bpms.x = x;
        record.bpms.y = y;
    }
}
