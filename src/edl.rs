use crate::media::MediaType;
use serde::{Deserialize, Serialize};

/// Clip window settings applied when wrapping a locator in an edit
/// decision list entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    /// Shifts the in-point without moving the window end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    /// Total number of plays; 0 and 1 both mean a single play.
    #[serde(default)]
    pub loops: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl ClipSpec {
    pub fn is_default(&self) -> bool {
        *self == ClipSpec::default()
    }

    pub fn plays(&self) -> u32 {
        self.loops.max(1)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EdlEntry {
    Clip {
        locator: String,
        start: Option<f64>,
        /// None when the source duration is unknown and no window caps it.
        length: Option<f64>,
    },
    /// Boundary between stream groups of the composed source.
    NewStream,
    /// Declare the next group's media type without opening it eagerly.
    DelayOpen { media_type: MediaType },
    NoChapters,
}

/// Ordered edit-decision-list builder. Purely a serializer and duration
/// calculator; callers never look inside the entries it accumulates.
#[derive(Clone, Debug, Default)]
pub struct EdlBuilder {
    entries: Vec<EdlEntry>,
}

impl EdlBuilder {
    pub fn new() -> Self {
        EdlBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn no_chapters(&mut self) -> &mut Self {
        self.entries.push(EdlEntry::NoChapters);
        self
    }

    pub fn new_stream(&mut self) -> &mut Self {
        self.entries.push(EdlEntry::NewStream);
        self
    }

    pub fn delay_open(&mut self, media_type: MediaType) -> &mut Self {
        self.entries.push(EdlEntry::DelayOpen { media_type });
        self
    }

    pub fn push_clip(
        &mut self,
        locator: &str,
        start: Option<f64>,
        length: Option<f64>,
    ) -> &mut Self {
        self.entries.push(EdlEntry::Clip {
            locator: locator.to_string(),
            start,
            length,
        });
        self
    }

    /// Emit a clip window over `locator`, repeated for the requested number
    /// of plays.
    pub fn clip(&mut self, locator: &str, spec: &ClipSpec, source_duration: Option<f64>) -> &mut Self {
        let start = spec.start.unwrap_or(0.0) + spec.offset.unwrap_or(0.0);
        let length = spec
            .duration
            .or(spec.end.map(|end| (end - spec.start.unwrap_or(0.0)).max(0.0)))
            .or(source_duration.map(|d| (d - start).max(0.0)));

        let start = (start > 0.0).then_some(start);
        for _ in 0..spec.plays() {
            self.push_clip(locator, start, length);
        }
        self
    }

    /// Loop a filler source until `deficit` seconds are covered exactly.
    pub fn pad(&mut self, locator: &str, source_duration: f64, deficit: f64) -> &mut Self {
        let mut remaining = deficit;
        while remaining > f64::EPSILON && source_duration > 0.0 {
            let take = remaining.min(source_duration);
            self.push_clip(locator, None, Some(take));
            remaining -= take;
        }
        self
    }

    /// Cut the entry list so clip lengths sum to at most `limit` seconds.
    pub fn truncate(&mut self, limit: f64) -> &mut Self {
        let mut elapsed = 0.0;
        let mut keep = self.entries.len();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if let EdlEntry::Clip { length, .. } = entry {
                let len = length.unwrap_or(0.0);
                if elapsed + len > limit {
                    let remainder = (limit - elapsed).max(0.0);
                    if remainder > f64::EPSILON {
                        *length = Some(remainder);
                        keep = index + 1;
                    } else {
                        keep = index;
                    }
                    break;
                }
                elapsed += len;
            }
        }
        self.entries.truncate(keep);
        self
    }

    pub fn append(&mut self, mut other: EdlBuilder) -> &mut Self {
        self.entries.append(&mut other.entries);
        self
    }

    /// Authoritative composed duration: per stream group, clip lengths sum;
    /// across groups the longest one wins. Clips with unknown length
    /// contribute nothing.
    pub fn duration(&self) -> f64 {
        let mut longest: f64 = 0.0;
        let mut current: f64 = 0.0;
        for entry in &self.entries {
            match entry {
                EdlEntry::Clip { length, .. } => current += length.unwrap_or(0.0),
                EdlEntry::NewStream => {
                    longest = longest.max(current);
                    current = 0.0;
                }
                _ => {}
            }
        }
        longest.max(current)
    }

    /// True when any clip's length could not be computed.
    pub fn has_unknown_length(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, EdlEntry::Clip { length: None, .. }))
    }

    /// Serialize as an inline `edl://` locator the engine can load.
    pub fn into_uri(self) -> String {
        let mut parts = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            match entry {
                EdlEntry::Clip {
                    locator,
                    start,
                    length,
                } => {
                    let mut part = format!("%{}%{}", locator.len(), locator);
                    if let Some(start) = start {
                        part.push_str(&format!(",start={start:.6}"));
                    }
                    if let Some(length) = length {
                        part.push_str(&format!(",length={length:.6}"));
                    }
                    parts.push(part);
                }
                EdlEntry::NewStream => parts.push("!new_stream".to_string()),
                EdlEntry::DelayOpen { media_type } => {
                    parts.push(format!("!delay_open,media_type={media_type}"))
                }
                EdlEntry::NoChapters => parts.push("!no_chapters".to_string()),
            }
        }
        format!("edl://{}", parts.join(";"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_window_precedence() {
        // duration override beats end-start beats source remainder
        let mut b = EdlBuilder::new();
        b.clip(
            "/a.mkv",
            &ClipSpec {
                start: Some(2.0),
                end: Some(8.0),
                duration: Some(3.0),
                ..ClipSpec::default()
            },
            Some(100.0),
        );
        assert!((b.duration() - 3.0).abs() < 1e-9);

        let mut b = EdlBuilder::new();
        b.clip(
            "/a.mkv",
            &ClipSpec {
                start: Some(2.0),
                end: Some(8.0),
                ..ClipSpec::default()
            },
            Some(100.0),
        );
        assert!((b.duration() - 6.0).abs() < 1e-9);

        let mut b = EdlBuilder::new();
        b.clip(
            "/a.mkv",
            &ClipSpec {
                start: Some(10.0),
                ..ClipSpec::default()
            },
            Some(100.0),
        );
        assert!((b.duration() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn loops_multiply_duration() {
        let mut b = EdlBuilder::new();
        b.clip(
            "/a.mkv",
            &ClipSpec {
                duration: Some(4.0),
                loops: 3,
                ..ClipSpec::default()
            },
            Some(4.0),
        );
        assert!((b.duration() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn pad_covers_deficit_exactly() {
        let mut b = EdlBuilder::new();
        b.pad("/silence.mka", 60.0, 150.0);
        assert!((b.duration() - 150.0).abs() < 1e-6);
    }

    #[test]
    fn duration_is_longest_stream_group() {
        let mut b = EdlBuilder::new();
        b.push_clip("/v.mkv", None, Some(20.0));
        b.new_stream();
        b.delay_open(MediaType::Audio);
        b.push_clip("/a.mka", None, Some(12.0));
        assert!((b.duration() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn uri_serialization_keeps_order() {
        let mut b = EdlBuilder::new();
        b.no_chapters();
        b.push_clip("/v.mkv", Some(1.5), Some(2.0));
        b.new_stream();
        b.delay_open(MediaType::Audio);
        b.push_clip("/a.mka", None, None);
        let expected = concat!(
            "edl://!no_chapters;%6%/v.mkv,start=1.500000,length=2.000000;",
            "!new_stream;!delay_open,media_type=audio;%6%/a.mka"
        );
        assert_eq!(b.into_uri(), expected);
    }

    #[test]
    fn truncate_cuts_mid_clip() {
        let mut b = EdlBuilder::new();
        b.push_clip("/a.mkv", None, Some(10.0));
        b.push_clip("/b.mkv", None, Some(10.0));
        b.push_clip("/c.mkv", None, Some(10.0));
        b.truncate(14.0);
        assert!((b.duration() - 14.0).abs() < 1e-9);

        let mut b = EdlBuilder::new();
        b.push_clip("/a.mkv", None, Some(10.0));
        b.push_clip("/b.mkv", None, Some(10.0));
        b.truncate(10.0);
        assert!((b.duration() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn offset_shifts_in_point() {
        let mut b = EdlBuilder::new();
        b.clip(
            "/a.mkv",
            &ClipSpec {
                start: Some(5.0),
                offset: Some(2.0),
                duration: Some(10.0),
                ..ClipSpec::default()
            },
            None,
        );
        let uri = b.into_uri();
        assert!(uri.contains("start=7.000000"), "{uri}");
    }
}
