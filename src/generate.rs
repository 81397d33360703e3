use crate::media::MediaType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Full parameter tuple for one generated placeholder. Identical tuples
/// must resolve to the same locator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    pub media_type: MediaType,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    /// Background color for video, e.g. "000000".
    pub background: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// Title text for intertitle subtitle tracks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl GenerateParams {
    pub fn null_stream(media_type: MediaType, duration: f64, width: u32, height: u32) -> Self {
        GenerateParams {
            media_type,
            duration,
            width,
            height,
            background: "000000".to_string(),
            fps: None,
            text: None,
        }
    }

    /// The cache key embeds every parameter. Text identity is carried by a
    /// hash of the raw string; the sanitized prefix only keeps the filename
    /// readable.
    pub fn cache_key(&self) -> String {
        let fps = self
            .fps
            .map(|f| format!("{f:.3}"))
            .unwrap_or_else(|| "na".to_string());
        let text = match &self.text {
            Some(text) => {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                let clean: String = text
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                    .take(24)
                    .collect();
                format!("{clean}-{:016x}", hasher.finish())
            }
            None => "none".to_string(),
        };
        format!(
            "{}-{:.3}-{}x{}-{}-{}-{}",
            self.media_type, self.duration, self.width, self.height, self.background, fps, text
        )
    }
}

/// Generated-media collaborator: renders a placeholder on disk and returns
/// its locator.
pub trait MediaGenerator: Send + Sync + 'static {
    fn generate(
        &self,
        params: &GenerateParams,
    ) -> impl Future<Output = anyhow::Result<String>> + Send;
}

/// Content-addressed store over a generator: repeated identical requests
/// are served from the cache without touching the generator again.
pub struct GeneratedStore<G> {
    inner: G,
    entries: Mutex<HashMap<String, String>>,
}

impl<G: MediaGenerator> GeneratedStore<G> {
    pub fn new(inner: G) -> Self {
        GeneratedStore {
            inner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn generate(&self, params: &GenerateParams) -> anyhow::Result<String> {
        let key = params.cache_key();
        if let Some(locator) = self.entries.lock().await.get(&key) {
            debug!(key, locator, "generated media cache hit");
            return Ok(locator.clone());
        }

        let locator = self.inner.generate(params).await?;
        self.entries.lock().await.insert(key, locator.clone());
        Ok(locator)
    }
}

/// Renders placeholders with an ffmpeg-compatible binary: solid color for
/// video, digital silence for audio, a styled text file for subtitles.
pub struct LavfiGenerator {
    binary: PathBuf,
    dir: PathBuf,
}

impl LavfiGenerator {
    pub fn new(binary: impl Into<PathBuf>, dir: impl Into<PathBuf>) -> Self {
        LavfiGenerator {
            binary: binary.into(),
            dir: dir.into(),
        }
    }

    fn subtitle_body(text: &str, duration: f64) -> String {
        let secs = duration.max(1.0);
        let end = format!(
            "{:02}:{:02}:{:06.3}",
            (secs / 3600.0) as u32,
            ((secs % 3600.0) / 60.0) as u32,
            secs % 60.0
        )
        .replace('.', ",");
        format!("1\n00:00:00,000 --> {end}\n{text}\n")
    }
}

impl MediaGenerator for LavfiGenerator {
    async fn generate(&self, params: &GenerateParams) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let key = params.cache_key();

        if params.media_type == MediaType::Subtitle {
            let out = self.dir.join(format!("{key}.srt"));
            if !out.is_file() {
                let text = params.text.as_deref().unwrap_or("");
                tokio::fs::write(&out, Self::subtitle_body(text, params.duration)).await?;
            }
            return Ok(out.to_string_lossy().into_owned());
        }

        let ext = match params.media_type {
            MediaType::Video => "mkv",
            MediaType::Audio => "mka",
            MediaType::Subtitle => unreachable!(),
        };
        let out = self.dir.join(format!("{key}.{ext}"));
        if out.is_file() {
            // Present on disk from a previous run, the key is the content.
            return Ok(out.to_string_lossy().into_owned());
        }

        let source = match params.media_type {
            MediaType::Video => format!(
                "color=c=0x{}:s={}x{}:r={}",
                params.background,
                params.width,
                params.height,
                params.fps.unwrap_or(25.0)
            ),
            MediaType::Audio => "anullsrc=r=48000:cl=stereo".to_string(),
            MediaType::Subtitle => unreachable!(),
        };

        info!(key, "generating placeholder media");
        let status = tokio::process::Command::new(&self.binary)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-f", "lavfi"])
            .args(["-i", &source])
            .args(["-t", &format!("{:.3}", params.duration)])
            .arg(&out)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("placeholder generation exited with {status}");
        }

        Ok(out.to_string_lossy().into_owned())
    }
}
