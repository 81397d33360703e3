use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Reported video durations below this are treated as still images.
pub const STILL_IMAGE_THRESHOLD: f64 = 0.040;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
}

impl MediaType {
    pub const ALL: [MediaType; 3] = [MediaType::Video, MediaType::Audio, MediaType::Subtitle];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Subtitle => "subtitle",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One probed elementary stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamInfo {
    pub media_type: MediaType,
    #[serde(default)]
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub album_art: bool,
    #[serde(default)]
    pub interlaced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
}

impl StreamInfo {
    pub fn new(media_type: MediaType) -> Self {
        StreamInfo {
            media_type,
            codec: String::new(),
            title: None,
            language: None,
            default: false,
            forced: false,
            album_art: false,
            interlaced: false,
            fps: None,
        }
    }
}

/// A logical file contributing streams to a plan: the composed source
/// itself, or an override/sidecar layered on top of it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaFile {
    pub locator: String,
    pub title: String,
    pub streams: Vec<StreamInfo>,
    /// Secondary files' subtitle streams auto-select only when no primary
    /// subtitle exists.
    #[serde(default)]
    pub secondary: bool,
}

/// Probed facts about one locator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaInfo {
    pub locator: String,
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub streams: Vec<StreamInfo>,
    /// Sidecar files next to the source (artwork, external subtitles).
    #[serde(default)]
    pub external_files: Vec<String>,
    /// True for sources that need remote extraction (streaming-site URLs).
    #[serde(default)]
    pub needs_extraction: bool,
}

impl MediaInfo {
    /// The "does not exist" value probe failures silently resolve to.
    pub fn missing(locator: &str) -> Self {
        MediaInfo {
            locator: locator.to_string(),
            exists: false,
            duration: None,
            streams: Vec::new(),
            external_files: Vec::new(),
            needs_extraction: false,
        }
    }

    pub fn streams_of(&self, media_type: MediaType) -> impl Iterator<Item = &StreamInfo> {
        self.streams
            .iter()
            .filter(move |s| s.media_type == media_type)
    }

    pub fn has_type(&self, media_type: MediaType) -> bool {
        self.streams_of(media_type).next().is_some()
    }

    pub fn media_types(&self) -> Vec<MediaType> {
        MediaType::ALL
            .into_iter()
            .filter(|t| self.has_type(*t))
            .collect()
    }

    /// True when the source is a still image: its only video stream reports
    /// a sub-frame duration and it carries no audio.
    pub fn is_still_image(&self) -> bool {
        self.exists
            && self.has_type(MediaType::Video)
            && !self.has_type(MediaType::Audio)
            && self.duration.is_some_and(|d| d < STILL_IMAGE_THRESHOLD)
    }

    pub fn artwork_sidecar(&self) -> Option<&str> {
        self.external_files
            .iter()
            .find(|f| {
                let lower = f.to_ascii_lowercase();
                lower.ends_with(".jpg") || lower.ends_with(".jpeg") || lower.ends_with(".png")
            })
            .map(String::as_str)
    }
}

/// Media probing collaborator.
pub trait MediaProbe: Send + Sync + 'static {
    fn probe(&self, locator: &str) -> impl Future<Output = anyhow::Result<MediaInfo>> + Send;
}

/// Locator-keyed cache over any probe. Probe failures are converted into a
/// "does not exist" MediaInfo and logged, never raised.
pub struct ProbeCache<P> {
    inner: P,
    cache: Mutex<HashMap<String, MediaInfo>>,
}

impl<P: MediaProbe> ProbeCache<P> {
    pub fn new(inner: P) -> Self {
        ProbeCache {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn probe(&self, locator: &str) -> MediaInfo {
        if let Some(info) = self.cache.lock().await.get(locator) {
            return info.clone();
        }

        let info = match self.inner.probe(locator).await {
            Ok(info) => info,
            Err(error) => {
                warn!(locator, %error, "probe failed, treating as missing");
                MediaInfo::missing(locator)
            }
        };

        self.cache
            .lock()
            .await
            .insert(locator.to_string(), info.clone());
        info
    }
}

//
// ffprobe-compatible implementation
//

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Deserialize, Default)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: String,
    #[serde(default)]
    codec_name: String,
    #[serde(default)]
    avg_frame_rate: String,
    #[serde(default)]
    field_order: Option<String>,
    #[serde(default)]
    disposition: HashMap<String, i64>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den > 0.0 && num > 0.0 {
        Some(num / den)
    } else {
        None
    }
}

impl FfprobeStream {
    fn into_stream_info(self) -> Option<StreamInfo> {
        let media_type = match self.codec_type.as_str() {
            "video" => MediaType::Video,
            "audio" => MediaType::Audio,
            "subtitle" => MediaType::Subtitle,
            _ => return None,
        };

        let flag = |key: &str| self.disposition.get(key).copied().unwrap_or(0) != 0;
        Some(StreamInfo {
            media_type,
            codec: self.codec_name,
            title: self.tags.get("title").cloned(),
            language: self.tags.get("language").cloned(),
            default: flag("default"),
            forced: flag("forced"),
            album_art: flag("attached_pic"),
            interlaced: self
                .field_order
                .as_deref()
                .is_some_and(|order| order != "progressive" && !order.is_empty()),
            fps: parse_rate(&self.avg_frame_rate),
        })
    }
}

/// Shells out to an ffprobe-compatible binary and parses its JSON output.
pub struct FfprobeProbe {
    binary: PathBuf,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        FfprobeProbe {
            binary: binary.into(),
        }
    }

    fn looks_remote(locator: &str) -> bool {
        locator.starts_with("http://") || locator.starts_with("https://")
    }

    fn sidecars(locator: &str) -> Vec<String> {
        let path = Path::new(locator);
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return Vec::new();
        };
        let Some(dir) = path.parent() else {
            return Vec::new();
        };

        const SIDECAR_EXTS: [&str; 6] = ["jpg", "jpeg", "png", "srt", "vtt", "ass"];
        SIDECAR_EXTS
            .iter()
            .map(|ext| dir.join(format!("{stem}.{ext}")))
            .filter(|candidate| candidate.is_file())
            .filter_map(|candidate| candidate.to_str().map(str::to_string))
            .collect()
    }
}

impl MediaProbe for FfprobeProbe {
    async fn probe(&self, locator: &str) -> anyhow::Result<MediaInfo> {
        // Streaming-site URLs are left to remote extraction, not probed
        // directly.
        if Self::looks_remote(locator) {
            return Ok(MediaInfo {
                locator: locator.to_string(),
                exists: true,
                duration: None,
                streams: Vec::new(),
                external_files: Vec::new(),
                needs_extraction: true,
            });
        }

        let output = tokio::process::Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(locator)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            anyhow::bail!("probe exited with {}", output.status);
        }

        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
        let duration = parsed
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok());
        let streams: Vec<StreamInfo> = parsed
            .streams
            .into_iter()
            .filter_map(FfprobeStream::into_stream_info)
            .collect();

        debug!(locator, ?duration, streams = streams.len(), "probed");
        Ok(MediaInfo {
            locator: locator.to_string(),
            exists: true,
            duration,
            streams,
            external_files: Self::sidecars(locator),
            needs_extraction: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProbe;

    impl MediaProbe for FailingProbe {
        async fn probe(&self, _locator: &str) -> anyhow::Result<MediaInfo> {
            anyhow::bail!("boom")
        }
    }

    struct CountingProbe(std::sync::atomic::AtomicUsize);

    impl MediaProbe for CountingProbe {
        async fn probe(&self, locator: &str) -> anyhow::Result<MediaInfo> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(MediaInfo {
                duration: Some(10.0),
                exists: true,
                ..MediaInfo::missing(locator)
            })
        }
    }

    #[tokio::test]
    async fn probe_failure_resolves_to_missing() {
        let cache = ProbeCache::new(FailingProbe);
        let info = cache.probe("/nope.mkv").await;
        assert!(!info.exists);
        assert_eq!(info.locator, "/nope.mkv");
    }

    #[tokio::test]
    async fn probe_results_are_cached_by_locator() {
        let cache = ProbeCache::new(CountingProbe(Default::default()));
        let a = cache.probe("/a.mkv").await;
        let b = cache.probe("/a.mkv").await;
        assert_eq!(a.duration, b.duration);
        assert_eq!(cache.inner.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn still_image_detection_uses_threshold() {
        let mut info = MediaInfo::missing("/img.png");
        info.exists = true;
        info.streams = vec![StreamInfo::new(MediaType::Video)];
        info.duration = Some(0.02);
        assert!(info.is_still_image());

        info.duration = Some(1.0);
        assert!(!info.is_still_image());
    }

    #[test]
    fn ffprobe_json_maps_dispositions() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "avg_frame_rate": "30000/1001",
                 "disposition": {"default": 1, "attached_pic": 0}},
                {"codec_type": "audio", "codec_name": "aac", "avg_frame_rate": "0/0",
                 "disposition": {"forced": 1}, "tags": {"language": "eng"}}
            ],
            "format": {"duration": "42.5"}
        }"#;
        let parsed: FfprobeOutput = serde_json::from_str(json).unwrap();
        let streams: Vec<StreamInfo> = parsed
            .streams
            .into_iter()
            .filter_map(FfprobeStream::into_stream_info)
            .collect();
        assert_eq!(streams.len(), 2);
        assert!(streams[0].default);
        assert!((streams[0].fps.unwrap() - 29.97).abs() < 0.01);
        assert!(streams[1].forced);
        assert_eq!(streams[1].language.as_deref(), Some("eng"));
    }
}
