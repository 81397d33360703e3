pub mod config;
pub mod edl;
pub mod engine;
pub mod error;
pub mod fade;
pub mod filter;
pub mod generate;
pub mod media;
pub mod pipeline;
pub mod plan;
pub mod playlist;
pub mod session;
pub mod streams;

use anyhow::Context;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info, warn};

//
// Re-export
//
pub use config::Config;
pub use edl::{ClipSpec, EdlBuilder, EdlEntry};
pub use engine::{EndReason, Engine, EngineEvent};
pub use error::{CompileError, PipelineError};
pub use fade::{FadeDirection, FadeDirective, FadeTimeline, FadeTrack};
pub use filter::{Canvas, ChannelMode, FilterUpdate, LiveSettings, assemble};
pub use generate::{GenerateParams, GeneratedStore, LavfiGenerator, MediaGenerator};
pub use media::{FfprobeProbe, MediaInfo, MediaProbe, MediaType, ProbeCache, StreamInfo};
pub use pipeline::{DeliveryPipeline, PipelineConfig, SessionClock};
pub use plan::{CompileOpts, CompilerConfig, PlanCompiler, PlaybackPlan};
pub use playlist::{ItemSettings, PlaylistItem, PlaylistMode};
pub use session::{
    LoadOutcome, PlaylistCursor, SessionController, SessionSignal, SessionState, SideEffect,
};
pub use streams::StreamMap;

const INPUT_CHUNK: usize = 64 * 1024;

/// Compile the configured playlist and pump this process's stdin, treated
/// as the engine's muxed output, through the delivery pipeline to the
/// configured destination.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let workspace = PathBuf::from_str(&config.workspace).context("invalid workspace dir")?;

    let playlist = tokio::fs::read_to_string(&config.playlist)
        .await
        .with_context(|| format!("failed to read playlist {}", config.playlist))?;
    let root: PlaylistItem =
        serde_json::from_str(&playlist).context("failed to parse playlist")?;

    let probe = ProbeCache::new(FfprobeProbe::new(config.ffprobe_bin.as_str()));
    let store = GeneratedStore::new(LavfiGenerator::new(
        config.ffmpeg_bin.as_str(),
        workspace.join("generated"),
    ));
    let compiler_defaults = CompilerConfig::default();
    let compiler_config = CompilerConfig {
        width: config.width,
        height: config.height,
        fps: config.fps,
        background_file: config.background_file.clone(),
        logo_file: config.logo_file.clone(),
        live_ingest_base: config
            .live_ingest_base
            .clone()
            .unwrap_or(compiler_defaults.live_ingest_base),
        session_key: config
            .session_key
            .clone()
            .unwrap_or(compiler_defaults.session_key),
    };
    let compiler = PlanCompiler::new(probe, store, compiler_config);

    let plan = compiler.compile(&root, CompileOpts::root()).await?;
    info!(
        locator = %plan.locator,
        duration = plan.duration,
        unknown = plan.unknown_duration,
        streams = plan.streams.streams().len(),
        "playback plan compiled"
    );

    let (input_tx, input_rx) = async_channel::bounded::<Bytes>(16);
    let (out_tx, out_rx) = async_channel::bounded::<Bytes>(16);

    // Engine output arrives on stdin.
    let reader = tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; INPUT_CHUNK];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if input_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "stdin read failed");
                    break;
                }
            }
        }
    });

    let mut writer = tokio::spawn(write_output(config.output.clone(), out_rx));

    // Delivery loop: one pipeline instance per pass. A fatal tears the
    // instance down in order and respawns it from the last session
    // position, so the output timeline continues instead of rewinding.
    let mut start_offset = 0.0;
    loop {
        let pipeline_config = PipelineConfig {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            max_buffer_secs: config.max_buffer_secs,
            start_offset,
        };
        let pipeline = DeliveryPipeline::spawn(&pipeline_config, input_rx.clone())?;
        let fatal = pipeline.fatal.clone();

        let forward_rx = pipeline.output.clone();
        let forward_tx = out_tx.clone();
        let forward = tokio::spawn(async move {
            while let Ok(chunk) = forward_rx.recv().await {
                if forward_tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        tokio::select! {
            err = fatal.recv() => {
                start_offset = pipeline.position().pts;
                pipeline.shutdown().await;
                let _ = forward.await;
                if input_rx.is_closed() && input_rx.is_empty() {
                    // Engine output ran out; nothing left to resume.
                    info!("delivery finished");
                    break;
                }
                if let Ok(err) = err {
                    warn!(%err, start_offset, "delivery pipeline fatal, recycling");
                }
            }
            result = &mut writer => {
                match result {
                    Ok(Ok(())) => info!("output closed"),
                    Ok(Err(err)) => error!(%err, "output write failed"),
                    Err(err) => error!(%err, "output task failed"),
                }
                pipeline.shutdown().await;
                forward.abort();
                reader.abort();
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                pipeline.shutdown().await;
                let _ = forward.await;
                break;
            }
        }
    }

    reader.abort();
    drop(out_tx);
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(%err, "output write failed"),
        Err(err) => error!(%err, "output task failed"),
    }
    Ok(())
}

async fn write_output(
    destination: String,
    output: async_channel::Receiver<Bytes>,
) -> anyhow::Result<()> {
    if destination == "-" {
        let mut stdout = tokio::io::stdout();
        while let Ok(chunk) = output.recv().await {
            stdout.write_all(&chunk).await?;
        }
        stdout.flush().await?;
    } else {
        let mut file = tokio::fs::File::create(Path::new(&destination))
            .await
            .with_context(|| format!("failed to create output {destination}"))?;
        while let Ok(chunk) = output.recv().await {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
    }
    Ok(())
}
