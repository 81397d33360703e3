use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure that can be loaded from CLI or config file
///
/// Example configuration file content
/// # Playout Configuration
///
/// # Playlist and output
/// playlist = "./channel.json"
/// output = "-"
///
/// # Canvas
/// width = 1280
/// height = 720
/// fps = 25.0
///
/// # Delivery
/// max_buffer_secs = 10.0
/// workspace = "./data"
///
/// # External binaries
/// ffmpeg_bin = "ffmpeg"
/// ffprobe_bin = "ffprobe"
///
/// # Optional root decorations
/// background_file = "/srv/branding/background.mp4"
/// logo_file = "/srv/branding/logo.png"
///
/// # Live ingest
/// live_ingest_base = "rtmp://localhost/live"
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Playlist file to play
    #[arg(short, long, default_value = "playlist.json")]
    #[serde(default = "default_playlist")]
    pub playlist: String,

    /// Output path, or "-" for stdout
    #[arg(short, long, default_value = "-")]
    #[serde(default = "default_output")]
    pub output: String,

    /// Canvas width in pixels
    #[arg(long, default_value_t = 1280)]
    #[serde(default = "default_width")]
    pub width: u32,

    /// Canvas height in pixels
    #[arg(long, default_value_t = 720)]
    #[serde(default = "default_height")]
    pub height: u32,

    /// Canvas frame rate
    #[arg(long, default_value_t = 25.0)]
    #[serde(default = "default_fps")]
    pub fps: f64,

    /// Pacing look-ahead window in seconds
    #[arg(short = 'b', long, default_value_t = 10.0)]
    #[serde(default = "default_max_buffer_secs")]
    pub max_buffer_secs: f64,

    /// Working directory for generated media
    #[arg(short = 'w', long, default_value = ".")]
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Configuration file path (overrides all other arguments)
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Remux binary
    #[arg(long, default_value = "ffmpeg")]
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,

    /// Probe binary
    #[arg(long, default_value = "ffprobe")]
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: String,

    /// Background decoration behind the main video
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_file: Option<String>,

    /// Logo overlay file
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_file: Option<String>,

    /// Base URL live:// keys resolve against
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_ingest_base: Option<String>,

    /// Session key appended to live ingest URLs
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            playlist: default_playlist(),
            output: default_output(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            max_buffer_secs: default_max_buffer_secs(),
            workspace: default_workspace(),
            config: None,
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
            background_file: None,
            logo_file: None,
            live_ingest_base: None,
            session_key: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        // First parse CLI args
        let mut config = Config::parse();

        // If a config file is specified, load it and merge
        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.playlist == default_playlist() {
            self.playlist = file_config.playlist;
        }
        if self.output == default_output() {
            self.output = file_config.output;
        }
        if self.width == default_width() {
            self.width = file_config.width;
        }
        if self.height == default_height() {
            self.height = file_config.height;
        }
        if self.fps == default_fps() {
            self.fps = file_config.fps;
        }
        if self.max_buffer_secs == default_max_buffer_secs() {
            self.max_buffer_secs = file_config.max_buffer_secs;
        }
        if self.workspace == default_workspace() {
            self.workspace = file_config.workspace;
        }
        if self.ffmpeg_bin == default_ffmpeg_bin() {
            self.ffmpeg_bin = file_config.ffmpeg_bin;
        }
        if self.ffprobe_bin == default_ffprobe_bin() {
            self.ffprobe_bin = file_config.ffprobe_bin;
        }

        // For Option fields, CLI takes precedence if Some
        if self.background_file.is_none() {
            self.background_file = file_config.background_file;
        }
        if self.logo_file.is_none() {
            self.logo_file = file_config.logo_file;
        }
        if self.live_ingest_base.is_none() {
            self.live_ingest_base = file_config.live_ingest_base;
        }
        if self.session_key.is_none() {
            self.session_key = file_config.session_key;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow::anyhow!("Canvas dimensions must be non-zero"));
        }
        if !(self.fps > 0.0) {
            return Err(anyhow::anyhow!("Canvas fps must be positive"));
        }
        if !(self.max_buffer_secs > 0.0) {
            return Err(anyhow::anyhow!("max_buffer_secs must be positive"));
        }
        if let Some(base) = &self.live_ingest_base {
            if base.is_empty() {
                return Err(anyhow::anyhow!("Live ingest base cannot be empty"));
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_playlist() -> String {
    "playlist.json".to_string()
}

fn default_output() -> String {
    "-".to_string()
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_fps() -> f64 {
    25.0
}

fn default_max_buffer_secs() -> f64 {
    10.0
}

fn default_workspace() -> String {
    ".".to_string()
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_bin() -> String {
    "ffprobe".to_string()
}
