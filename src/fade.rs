use serde::{Deserialize, Serialize};

/// Which rendered tracks a fade applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FadeTrack {
    Video,
    Audio,
    /// Undifferentiated: applies to both video and audio.
    All,
}

impl FadeTrack {
    pub fn covers_video(&self) -> bool {
        matches!(self, FadeTrack::Video | FadeTrack::All)
    }

    pub fn covers_audio(&self) -> bool {
        matches!(self, FadeTrack::Audio | FadeTrack::All)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FadeDirection {
    In,
    Out,
}

/// One fade keyed to the compiled plan's single continuous timeline.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FadeDirective {
    pub track: FadeTrack,
    pub direction: FadeDirection,
    /// Absolute offset on the composed timeline, seconds.
    pub offset: f64,
    pub duration: f64,
}

/// Flat accumulator of fade directives for one compiled tree. Threaded
/// explicitly through every resolution call; children append to it with
/// their own running offsets. Append-only, never reordered.
#[derive(Clone, Debug, Default)]
pub struct FadeTimeline {
    directives: Vec<FadeDirective>,
}

impl FadeTimeline {
    pub fn new() -> Self {
        FadeTimeline::default()
    }

    pub fn push(&mut self, directive: FadeDirective) {
        self.directives.push(directive);
    }

    pub fn fade_in(&mut self, track: FadeTrack, offset: f64, duration: f64) {
        self.push(FadeDirective {
            track,
            direction: FadeDirection::In,
            offset,
            duration,
        });
    }

    pub fn fade_out(&mut self, track: FadeTrack, offset: f64, duration: f64) {
        self.push(FadeDirective {
            track,
            direction: FadeDirection::Out,
            offset,
            duration,
        });
    }

    pub fn directives(&self) -> &[FadeDirective] {
        &self.directives
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}
