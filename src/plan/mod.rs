pub mod compiler;

pub use compiler::{CompileOpts, CompilerConfig, PlanCompiler, NOMINAL_PLACEHOLDER_SECS};

use crate::fade::FadeTimeline;
use crate::playlist::ItemSettings;
use crate::streams::StreamMap;

/// The compiler's output for one playlist item: a ready-to-load composed
/// source plus its stream map and timing metadata. Immutable once returned;
/// a reload produces a whole new plan, never a patched one.
#[derive(Clone, Debug)]
pub struct PlaybackPlan {
    /// Composed source locator handed to the engine.
    pub locator: String,
    /// Effective duration in seconds; 0 when unknown.
    pub duration: f64,
    pub unknown_duration: bool,
    /// Container-level seekability.
    pub seekable: bool,
    /// False for irrecoverably live sources.
    pub internal_seekable: bool,
    /// Background color behind padded frames.
    pub background: String,
    /// Effective settings after resolution.
    pub settings: ItemSettings,
    pub streams: StreamMap,
    /// Shared fade timeline of the whole compiled tree. Only the root
    /// plan's list is populated.
    pub fades: FadeTimeline,
    /// Child plans, kept for introspection.
    pub children: Vec<PlaybackPlan>,
}

impl PlaybackPlan {
    pub(crate) fn skeleton(locator: String, settings: ItemSettings) -> Self {
        let background = settings
            .background
            .clone()
            .unwrap_or_else(|| "000000".to_string());
        PlaybackPlan {
            locator,
            duration: 0.0,
            unknown_duration: false,
            seekable: true,
            internal_seekable: true,
            background,
            settings,
            streams: StreamMap::new(),
            fades: FadeTimeline::new(),
            children: Vec::new(),
        }
    }
}
