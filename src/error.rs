use crate::media::MediaType;
use thiserror::Error;

/// Errors the plan compiler can fail with. Recoverable content problems
/// (missing files, probe failures, bad stream picks) are handled inside the
/// compiler with logged substitutions and never surface here.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("no eligible {media_type} stream available for load")]
    NoEligibleStream { media_type: MediaType },

    #[error("placeholder generation failed for {media_type}: {source}")]
    Generate {
        media_type: MediaType,
        #[source]
        source: anyhow::Error,
    },
}

/// Fatal delivery pipeline errors. Any of these recycles the whole
/// engine + pipeline instance; the pipeline is never restarted in place.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to spawn remux process: {0}")]
    RemuxSpawn(#[source] std::io::Error),

    #[error("remux process exited: {status}")]
    RemuxExited { status: std::process::ExitStatus },

    #[error("remux io failed: {0}")]
    RemuxIo(#[source] std::io::Error),

    #[error("delivery channel closed")]
    ChannelClosed,

    #[error("engine reported fatal: {0}")]
    EngineFatal(String),
}
