use std::process::Stdio;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::error::PipelineError;

/// Stream-copy remux child sitting between the engine output and the
/// consumer. It repairs container-level discontinuities at segment joins
/// without touching the coded frames.
pub struct RemuxProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

impl RemuxProcess {
    /// Spawn the remux child reading MPEG-TS on stdin and writing a
    /// continuous MPEG-TS on stdout. `start_offset` shifts all output
    /// timestamps so a restarted pipeline resumes the session timeline
    /// instead of rewinding to zero.
    pub fn spawn(bin: &str, start_offset: f64) -> Result<Self, PipelineError> {
        let mut command = Command::new(bin);
        command
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "mpegts", "-i", "pipe:0"])
            .args(["-map", "0", "-c", "copy"])
            .args(["-bsf:v", "h264_mp4toannexb"])
            .args(["-bsf:a", "aac_adtstoasc"])
            .args(["-map_metadata", "-1"])
            .args(["-f", "mpegts", "-muxdelay", "0"])
            .args(["-output_ts_offset", &format!("{start_offset:.6}")])
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        debug!(bin, start_offset, "spawning remux process");
        let mut child = command.spawn().map_err(PipelineError::RemuxSpawn)?;
        let stdin = child.stdin.take().ok_or(PipelineError::ChannelClosed)?;
        let stdout = child.stdout.take().ok_or(PipelineError::ChannelClosed)?;
        info!(pid = child.id(), "remux process started");

        Ok(RemuxProcess {
            child,
            stdin,
            stdout,
        })
    }
}
