use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::capture::CaptureSource;
use crate::convert::to_video_frame;
use crate::publish::Publisher;
use crate::rate::Rate;

/// Counters for one run of the forwarding loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub published: u64,
    pub read_failures: u64,
}

/// Reads frames from a capture source, converts them to BGR8 and publishes
/// them at no more than the target rate.
pub struct StreamForwarder {
    target_rate_hz: f64,
    frame_id: String,
    next_seq: u64,
}

impl StreamForwarder {
    pub fn new(target_rate_hz: f64, frame_id: impl Into<String>) -> Self {
        Self {
            target_rate_hz,
            frame_id: frame_id.into(),
            next_seq: 0,
        }
    }

    /// Run until `shutdown` reads `true`.
    ///
    /// The signal is checked at the top of every iteration, so shutdown takes
    /// effect once the in-flight read returns. A failed read is logged and
    /// retried immediately; only published frames are paced.
    pub async fn run<S, P>(
        &mut self,
        source: &mut S,
        channel: &mut P,
        shutdown: &watch::Receiver<bool>,
    ) -> RunSummary
    where
        S: CaptureSource,
        P: Publisher,
    {
        let mut rate = Rate::new(self.target_rate_hz);
        let mut summary = RunSummary::default();

        info!(
            rate_hz = self.target_rate_hz,
            period_ms = rate.period().as_millis() as u64,
            frame_id = self.frame_id,
            "forwarding frames"
        );

        loop {
            if *shutdown.borrow() {
                info!(
                    iterations = summary.iterations,
                    published = summary.published,
                    read_failures = summary.read_failures,
                    "shutdown requested, stopping"
                );
                return summary;
            }
            summary.iterations += 1;

            let raw = match source.read_frame().await {
                Ok(raw) => raw,
                Err(e) => {
                    summary.read_failures += 1;
                    warn!(error = %e, failures = summary.read_failures, "failed to read frame");
                    continue;
                }
            };

            let frame = match to_video_frame(raw, self.next_seq, &self.frame_id) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(error = %e, "converted frame has inconsistent geometry, skipping");
                    continue;
                }
            };
            self.next_seq += 1;

            debug!(
                seq = frame.seq,
                width = frame.width,
                height = frame.height,
                bytes = frame.data.len(),
                captured_at = %frame.captured_at(),
                "publishing frame"
            );
            channel.publish(frame);
            summary.published += 1;

            if !*shutdown.borrow() {
                rate.sleep().await;
            }
        }
    }
}
