use crate::edl::ClipSpec;
use serde::{Deserialize, Serialize};

pub const SCHEME_EMPTY: &str = "empty://";
pub const SCHEME_INTERTITLE: &str = "intertitle://";
pub const SCHEME_LIVE: &str = "live://";
pub const SCHEME_EXIT: &str = "exit://";

/// How a sub-playlist's children compose into one source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlaylistMode {
    /// Children are stepped one at a time by the controller. Only
    /// meaningful on the top-level root.
    #[default]
    Individual,
    /// Children flatten into one single-track edit decision list.
    Merged,
    /// Children route onto per-media-type track lanes.
    TwoTrack,
}

impl PlaylistMode {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PlaylistMode::Merged,
            2 => PlaylistMode::TwoTrack,
            _ => PlaylistMode::Individual,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PlaylistMode::Individual => 0,
            PlaylistMode::Merged => 1,
            PlaylistMode::TwoTrack => 2,
        }
    }
}

// Persisted playlists store the mode as a small integer.
impl Serialize for PlaylistMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for PlaylistMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(PlaylistMode::from_u8(u8::deserialize(deserializer)?))
    }
}

/// Per-item settings bag. All fields default so playlist files only spell
/// out what they change.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_end: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_offset: Option<f64>,
    pub clip_loops: u32,

    /// Fade lengths in seconds; zero disables.
    pub fade_in: f64,
    pub fade_out: f64,

    /// Background color behind padded/undersized frames, e.g. "000000".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,

    /// Per-type file overrides layered onto the composed source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_file: Option<String>,

    pub playlist_mode: PlaylistMode,
    /// Composite duration ends with the shortest track instead of the
    /// longest.
    pub end_on_shortest: bool,
    /// Pad a short audio lane by replaying the video lane's audio instead
    /// of silence.
    pub extend_audio: bool,
    /// Album-art display mode: art streams become eligible for selection.
    pub art_mode: bool,
    /// Free-run instead of halting at the (possibly unknown) end.
    pub loop_forever: bool,

    /// Explicit stream overrides, type-local ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_stream: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_stream: Option<usize>,
}

impl ItemSettings {
    pub fn clip_spec(&self) -> ClipSpec {
        ClipSpec {
            start: self.clip_start,
            end: self.clip_end,
            offset: self.clip_offset,
            loops: self.clip_loops,
            duration: None,
        }
    }

    pub fn has_clip(&self) -> bool {
        self.clip_start.is_some()
            || self.clip_end.is_some()
            || self.clip_offset.is_some()
            || self.clip_loops > 1
    }
}

/// One node of the playlist tree. Items are read-only inputs to the
/// compiler; resolution never mutates them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub id: String,
    /// File path, pseudo-scheme URI, or absent for an empty slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    #[serde(default)]
    pub settings: ItemSettings,
    /// Present only when the item is a sub-playlist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<PlaylistItem>>,
}

impl PlaylistItem {
    pub fn new(id: impl Into<String>, locator: impl Into<String>) -> Self {
        PlaylistItem {
            id: id.into(),
            locator: Some(locator.into()),
            settings: ItemSettings::default(),
            children: None,
        }
    }

    /// Missing locators normalize to the empty sentinel.
    pub fn effective_locator(&self) -> String {
        self.locator
            .clone()
            .unwrap_or_else(|| SCHEME_EMPTY.to_string())
    }

    pub fn is_playlist(&self) -> bool {
        self.children.as_ref().is_some_and(|c| !c.is_empty())
    }

    pub fn is_exit(&self) -> bool {
        self.locator
            .as_deref()
            .is_some_and(|l| l.starts_with(SCHEME_EXIT))
    }
}

/// Strip a pseudo-scheme prefix, returning the remainder when it matches.
pub fn scheme_rest<'a>(locator: &'a str, scheme: &str) -> Option<&'a str> {
    locator.strip_prefix(scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_mode_roundtrips_as_integer() {
        let json = serde_json::to_string(&PlaylistMode::Merged).unwrap();
        assert_eq!(json, "1");
        let mode: PlaylistMode = serde_json::from_str("2").unwrap();
        assert_eq!(mode, PlaylistMode::TwoTrack);
        let mode: PlaylistMode = serde_json::from_str("0").unwrap();
        assert_eq!(mode, PlaylistMode::Individual);
    }

    #[test]
    fn missing_locator_normalizes_to_empty() {
        let item = PlaylistItem {
            id: "x".into(),
            locator: None,
            settings: ItemSettings::default(),
            children: None,
        };
        assert_eq!(item.effective_locator(), SCHEME_EMPTY);
    }

    #[test]
    fn item_settings_deserialize_sparse() {
        let item: PlaylistItem = serde_json::from_str(
            r#"{"id": "a", "locator": "/x.mkv", "settings": {"fade_in": 1.0, "playlist_mode": 1}}"#,
        )
        .unwrap();
        assert_eq!(item.settings.fade_in, 1.0);
        assert_eq!(item.settings.playlist_mode, PlaylistMode::Merged);
        assert!(!item.settings.has_clip());
    }

    #[test]
    fn clip_detection() {
        let mut settings = ItemSettings::default();
        assert!(!settings.has_clip());
        settings.clip_loops = 3;
        assert!(settings.has_clip());
    }
}
