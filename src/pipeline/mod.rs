pub mod pacing;
pub mod remux;
pub mod timing;

pub use pacing::{MAX_BUFFER_CEILING, PacingClock, PacingStage};
pub use remux::RemuxProcess;
pub use timing::{TimingUpdate, TsTimingParser};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;

const READ_CHUNK: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 16;

/// Session-wide playback position derived from the repaired output stream.
/// This is the single timing authority for pacing and for resuming after a
/// pipeline recycle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SessionClock {
    /// Accumulated presentation position in seconds.
    pub pts: f64,
    /// Accumulated decode position in seconds.
    pub dts: f64,
    /// Last observed video frame rate, 0 until derived.
    pub fps: f64,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub ffmpeg_bin: String,
    pub max_buffer_secs: f64,
    /// Session position the new instance resumes from.
    pub start_offset: f64,
}

/// The real-time delivery chain: engine output is paced against the wall
/// clock, remuxed into a continuous transport stream, and timed from the
/// repaired packets. One instance per engine lifetime; any stage failure
/// is fatal and the whole instance is recycled together with the engine.
pub struct DeliveryPipeline {
    /// Continuous repaired output.
    pub output: async_channel::Receiver<Bytes>,
    /// Live session position, updated from the remuxed stream.
    pub clock: watch::Receiver<SessionClock>,
    /// Receives at most one fatal error, then the pipeline is dead.
    pub fatal: async_channel::Receiver<PipelineError>,
    stop: CancellationToken,
    stage_tasks: Vec<JoinHandle<()>>,
    monitor: JoinHandle<()>,
}

impl DeliveryPipeline {
    pub fn spawn(
        config: &PipelineConfig,
        input: async_channel::Receiver<Bytes>,
    ) -> Result<Self, PipelineError> {
        let RemuxProcess {
            child,
            mut stdin,
            mut stdout,
        } = RemuxProcess::spawn(&config.ffmpeg_bin, config.start_offset)?;

        let initial = SessionClock {
            pts: config.start_offset,
            dts: config.start_offset,
            fps: 0.0,
        };
        let (clock_tx, clock_rx) = watch::channel(initial);
        let (paced_tx, paced_rx) = async_channel::bounded::<Bytes>(CHANNEL_DEPTH);
        let (output_tx, output_rx) = async_channel::bounded::<Bytes>(CHANNEL_DEPTH);
        let (fatal_tx, fatal_rx) = async_channel::bounded::<PipelineError>(1);
        let stop = CancellationToken::new();

        let mut stage_tasks = Vec::new();

        // Pacing stage: engine output held back to the buffer window.
        let stage = PacingStage::new(config.max_buffer_secs, clock_rx.clone());
        let fatal = fatal_tx.clone();
        stage_tasks.push(tokio::spawn(async move {
            if let Err(err) = stage.run(input, paced_tx).await {
                let _ = fatal.send(err).await;
            }
        }));

        // Feed paced chunks into the remux child.
        let fatal = fatal_tx.clone();
        stage_tasks.push(tokio::spawn(async move {
            while let Ok(chunk) = paced_rx.recv().await {
                if let Err(err) = stdin.write_all(&chunk).await {
                    let _ = fatal.send(PipelineError::RemuxIo(err)).await;
                    return;
                }
            }
            debug!("paced input drained, closing remux stdin");
            if let Err(err) = stdin.shutdown().await {
                warn!(%err, "remux stdin shutdown failed");
            }
        }));

        // Read the repaired stream, recover timing, forward downstream.
        let fatal = fatal_tx.clone();
        stage_tasks.push(tokio::spawn(async move {
            let mut parser = TsTimingParser::new();
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                let read = match stdout.read(&mut buf).await {
                    Ok(0) => {
                        info!("remux output reached end of stream");
                        return;
                    }
                    Ok(n) => n,
                    Err(err) => {
                        let _ = fatal.send(PipelineError::RemuxIo(err)).await;
                        return;
                    }
                };
                for update in parser.push(&buf[..read]) {
                    clock_tx.send_modify(|clock| {
                        clock.pts += update.pts_delta;
                        clock.dts += update.dts_delta;
                        if let Some(fps) = update.fps {
                            clock.fps = fps;
                        }
                    });
                }
                if output_tx
                    .send(Bytes::copy_from_slice(&buf[..read]))
                    .await
                    .is_err()
                {
                    debug!("delivery consumer gone, stopping reader");
                    return;
                }
            }
        }));

        // Child exit monitoring. Any exit before shutdown is fatal, clean
        // status included; shutdown kills the child instead.
        let monitor_stop = stop.clone();
        let monitor = tokio::spawn(async move {
            let mut child = child;
            tokio::select! {
                status = child.wait() => {
                    let err = match status {
                        Ok(status) => PipelineError::RemuxExited { status },
                        Err(err) => PipelineError::RemuxIo(err),
                    };
                    error!(%err, "remux process exited while pipeline live");
                    let _ = fatal_tx.send(err).await;
                }
                _ = monitor_stop.cancelled() => {
                    if let Err(err) = child.kill().await {
                        debug!(%err, "remux child already exited");
                    }
                }
            }
        });

        Ok(DeliveryPipeline {
            output: output_rx,
            clock: clock_rx,
            fatal: fatal_rx,
            stop,
            stage_tasks,
            monitor,
        })
    }

    /// Current session position, for carrying across a recycle.
    pub fn position(&self) -> SessionClock {
        *self.clock.borrow()
    }

    /// Tear the instance down in order: stop the stages first, then kill
    /// the remux child. Used for planned shutdown and fatal recovery alike.
    pub async fn shutdown(mut self) {
        for task in self.stage_tasks.drain(..) {
            task.abort();
        }
        self.stop.cancel();
        if let Err(err) = (&mut self.monitor).await {
            if !err.is_cancelled() {
                warn!(%err, "remux monitor task failed");
            }
        }
        info!("delivery pipeline shut down");
    }
}
