use bytes::Bytes;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use super::SessionClock;
use crate::error::PipelineError;

/// Hard ceiling on the look-ahead window regardless of configuration.
pub const MAX_BUFFER_CEILING: f64 = 60.0;

/// Pure pacing state: how far production runs ahead of the wall clock,
/// with drift absorption across consumer stalls.
#[derive(Debug)]
pub struct PacingClock {
    cap: f64,
    drift: f64,
}

impl PacingClock {
    pub fn new(max_buffer_secs: f64) -> Self {
        PacingClock {
            cap: max_buffer_secs.min(MAX_BUFFER_CEILING),
            drift: 0.0,
        }
    }

    /// How long to hold the current chunk before forwarding it.
    ///
    /// `output_pts` is the tracked presentation progress in seconds,
    /// `elapsed` the wall-clock seconds since delivery started. A stalled
    /// consumer (negative buffered-ahead) is absorbed into the drift
    /// correction instead of bursting to catch up; the returned delay is
    /// never negative.
    pub fn delay(&mut self, output_pts: f64, elapsed: f64) -> Duration {
        let buffered = output_pts - (elapsed + self.drift);
        if buffered < 0.0 {
            self.drift += buffered;
            trace!(buffered, drift = self.drift, "absorbed stall into drift");
            return Duration::ZERO;
        }
        if buffered > self.cap {
            return Duration::from_secs_f64(buffered - self.cap);
        }
        Duration::ZERO
    }

    pub fn drift(&self) -> f64 {
        self.drift
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }
}

/// First delivery stage: pass-through over the raw engine output that
/// holds chunks back so production never runs more than the buffer window
/// ahead of real time.
pub struct PacingStage {
    clock: PacingClock,
    timing: watch::Receiver<SessionClock>,
}

impl PacingStage {
    pub fn new(max_buffer_secs: f64, timing: watch::Receiver<SessionClock>) -> Self {
        PacingStage {
            clock: PacingClock::new(max_buffer_secs),
            timing,
        }
    }

    pub async fn run(
        mut self,
        input: async_channel::Receiver<Bytes>,
        output: async_channel::Sender<Bytes>,
    ) -> Result<(), PipelineError> {
        let started = Instant::now();
        // A recycled instance is seeded with the resumed session position;
        // pacing measures progress relative to it, not the absolute clock.
        let base = self.timing.borrow().pts;
        while let Ok(chunk) = input.recv().await {
            let pts = self.timing.borrow().pts - base;
            let elapsed = started.elapsed().as_secs_f64();
            let hold = self.clock.delay(pts, elapsed);
            if !hold.is_zero() {
                trace!(?hold, pts, elapsed, "pacing hold");
                sleep(hold).await;
            }
            output
                .send(chunk)
                .await
                .map_err(|_| PipelineError::ChannelClosed)?;
        }
        debug!("pacing stage input closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_delay_inside_the_window() {
        let mut clock = PacingClock::new(10.0);
        assert_eq!(clock.delay(5.0, 0.0), Duration::ZERO);
        assert_eq!(clock.delay(10.0, 1.0), Duration::ZERO);
    }

    #[test]
    fn delay_equals_excess_over_cap() {
        let mut clock = PacingClock::new(10.0);
        let hold = clock.delay(25.0, 5.0);
        // buffered = 20, cap = 10 -> hold 10s
        assert!((hold.as_secs_f64() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn cap_is_clamped_to_ceiling() {
        let clock = PacingClock::new(600.0);
        assert_eq!(clock.cap(), MAX_BUFFER_CEILING);
    }

    #[test]
    fn lookahead_never_exceeds_cap_plus_epsilon() {
        // Synthetic production at 4x real time against a 5s window: every
        // forwarded chunk's implied look-ahead stays within the cap.
        let mut clock = PacingClock::new(5.0);
        let mut elapsed = 0.0;
        for step in 1..=100 {
            let pts = step as f64 * 0.4; // produced
            let hold = clock.delay(pts, elapsed).as_secs_f64();
            elapsed += hold + 0.1; // wall clock advances by the hold plus work
            let lookahead = pts - (elapsed + clock.drift());
            assert!(lookahead <= 5.0 + 1e-6, "lookahead {lookahead} at {step}");
        }
    }

    #[test]
    fn stall_is_absorbed_not_burst() {
        let mut clock = PacingClock::new(5.0);
        // Normal progress.
        assert_eq!(clock.delay(1.0, 1.0), Duration::ZERO);
        // Consumer stalled for 20s of wall clock with no pts progress.
        let hold = clock.delay(1.0, 21.0);
        assert_eq!(hold, Duration::ZERO);
        assert!((clock.drift() - (-20.0)).abs() < 1e-9);
        // After the stall, production resumes: buffered-ahead is measured
        // against the corrected clock, so delays shrink instead of spiking.
        let hold = clock.delay(3.0, 22.0);
        assert_eq!(hold, Duration::ZERO);
        let hold = clock.delay(30.0, 23.0);
        assert!(hold.as_secs_f64() < 25.0, "corrected hold, no retroactive spike");
        assert!((hold.as_secs_f64() - 22.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn resumed_stage_does_not_stall_on_a_seeded_clock() {
        // A pipeline respawned mid-session starts with the clock already at
        // the resumed position; the first chunk must still flow promptly.
        let initial = SessionClock {
            pts: 100.0,
            dts: 100.0,
            fps: 25.0,
        };
        let (_clock_tx, clock_rx) = watch::channel(initial);
        let stage = PacingStage::new(10.0, clock_rx);
        let (in_tx, in_rx) = async_channel::bounded(1);
        let (out_tx, out_rx) = async_channel::bounded(1);
        let task = tokio::spawn(stage.run(in_rx, out_tx));

        in_tx.send(Bytes::from_static(b"ts")).await.unwrap();
        let chunk = tokio::time::timeout(Duration::from_millis(500), out_rx.recv())
            .await
            .expect("first chunk held back after resume")
            .unwrap();
        assert_eq!(&chunk[..], b"ts");

        drop(in_tx);
        task.await.unwrap().unwrap();
    }

    #[test]
    fn drift_only_ever_reduces_the_effective_clock() {
        let mut clock = PacingClock::new(5.0);
        clock.delay(0.0, 10.0);
        let first = clock.drift();
        clock.delay(100.0, 20.0);
        assert_eq!(clock.drift(), first, "positive buffer never moves drift");
    }
}
