use crate::fade::{FadeDirection, FadeDirective};
use crate::media::MediaType;
use crate::plan::PlaybackPlan;
use serde::{Deserialize, Serialize};

/// Fixed output geometry of the whole session. Every per-load graph pads
/// to this canvas so frame geometry never changes between segments.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Audio down-mix selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    #[default]
    Default,
    StereoMix,
    Left,
    Right,
}

/// A user-supplied filter with an explicit ordering index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserFilter {
    pub index: i32,
    pub filter: String,
}

/// Live, user-adjustable processing settings. Color values use a
/// -100..100 UI range and are mapped onto filter-native ranges here.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSettings {
    /// Normalized 0–1 crop margins.
    pub crop_left: f64,
    pub crop_right: f64,
    pub crop_top: f64,
    pub crop_bottom: f64,

    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub gamma: f64,
    pub hue: f64,

    pub user_prefilters: Vec<UserFilter>,
    pub user_filters: Vec<UserFilter>,

    pub channel_mode: ChannelMode,
    /// Positive shifts audio later, milliseconds.
    pub audio_delay_ms: i64,
    pub normalize_loudness: bool,
}

impl Default for LiveSettings {
    fn default() -> Self {
        LiveSettings {
            crop_left: 0.0,
            crop_right: 0.0,
            crop_top: 0.0,
            crop_bottom: 0.0,
            brightness: 0.0,
            contrast: 0.0,
            saturation: 0.0,
            gamma: 0.0,
            hue: 0.0,
            user_prefilters: Vec::new(),
            user_filters: Vec::new(),
            channel_mode: ChannelMode::default(),
            audio_delay_ms: 0,
            normalize_loudness: false,
        }
    }
}

/// One immutable snapshot pushed to the engine as a single property
/// update, never as incremental edits.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterUpdate {
    pub graph: String,
    pub video_id: usize,
    pub audio_id: Option<usize>,
    pub subtitle_id: Option<usize>,
}

/// Crop areas smaller than this fraction of the frame are degenerate.
const MIN_CROP_AREA: f64 = 0.01;

struct Chain {
    label: char,
    current: String,
    next: usize,
    stages: Vec<String>,
}

impl Chain {
    fn new(label: char, input: String) -> Self {
        Chain {
            label,
            current: input,
            next: 0,
            stages: Vec::new(),
        }
    }

    fn push(&mut self, filter: String) {
        let out = format!("{}{}", self.label, self.next);
        self.next += 1;
        self.stages
            .push(format!("[{}]{}[{}]", self.current, filter, out));
        self.current = out;
    }

    fn finish(mut self, terminal: &str) -> Vec<String> {
        if self.stages.is_empty() {
            // The graph must still rename the input pad to the terminal.
            self.push("null".to_string());
        }
        let last = self.stages.len() - 1;
        self.stages[last] = self.stages[last]
            .rsplit_once('[')
            .map(|(head, _)| format!("{head}[{terminal}]"))
            .unwrap_or_else(|| self.stages[last].clone());
        self.stages
    }
}

fn ordered(filters: &[UserFilter]) -> Vec<&UserFilter> {
    let mut sorted: Vec<&UserFilter> = filters.iter().collect();
    sorted.sort_by_key(|f| f.index);
    sorted
}

fn fade_expr(kind: &str, directive: &FadeDirective) -> String {
    let start = directive.offset;
    let end = directive.offset + directive.duration;
    let direction = match directive.direction {
        FadeDirection::In => "in",
        FadeDirection::Out => "out",
    };
    format!(
        "{kind}=t={direction}:st={start:.3}:d={:.3}:enable='between(t,{start:.3},{end:.3})'",
        directive.duration
    )
}

/// Build the per-load processing graph from the plan and the current live
/// settings. Stage order is fixed; stages are conditionally present.
pub fn assemble(
    plan: &PlaybackPlan,
    settings: &LiveSettings,
    canvas: Canvas,
    source_fps: Option<f64>,
) -> Result<FilterUpdate, crate::error::CompileError> {
    let video_id = plan.streams.select(
        MediaType::Video,
        plan.settings.video_stream,
        plan.settings.art_mode,
    )?;
    let audio_id = plan
        .streams
        .has_type(MediaType::Audio)
        .then(|| {
            plan.streams
                .select(MediaType::Audio, plan.settings.audio_stream, false)
        })
        .transpose()?;
    let subtitle_id = plan
        .streams
        .has_type(MediaType::Subtitle)
        .then(|| {
            plan.streams
                .select(MediaType::Subtitle, plan.settings.subtitle_stream, false)
        })
        .transpose()?;

    let mut video = Chain::new('v', format!("vid{}", video_id + 1));

    // Crop from normalized margins, skipped when degenerate.
    let crop_w = 1.0 - settings.crop_left - settings.crop_right;
    let crop_h = 1.0 - settings.crop_top - settings.crop_bottom;
    let cropped = crop_w < 1.0 - f64::EPSILON || crop_h < 1.0 - f64::EPSILON;
    if cropped && crop_w * crop_h > MIN_CROP_AREA && crop_w > 0.0 && crop_h > 0.0 {
        video.push(format!(
            "crop=w=iw*{crop_w:.4}:h=ih*{crop_h:.4}:x=iw*{:.4}:y=ih*{:.4}",
            settings.crop_left, settings.crop_top
        ));
    }

    // Scale to fit, preserving sample aspect ratio, even dimensions.
    video.push(format!(
        "scale=w={}:h={}:force_original_aspect_ratio=decrease:force_divisible_by=2",
        canvas.width, canvas.height
    ));

    // Color adjustment, -100..100 UI range onto eq/hue native ranges.
    let adjusted = settings.brightness != 0.0
        || settings.contrast != 0.0
        || settings.saturation != 0.0
        || settings.gamma != 0.0;
    if adjusted {
        video.push(format!(
            "eq=brightness={:.4}:contrast={:.4}:saturation={:.4}:gamma={:.4}",
            settings.brightness / 100.0,
            1.0 + settings.contrast / 100.0,
            (1.0 + settings.saturation / 100.0).max(0.0),
            (1.0 + settings.gamma / 100.0).max(0.1),
        ));
    }
    if settings.hue != 0.0 {
        video.push(format!("hue=h={:.2}", settings.hue * 1.8));
    }

    // Frame-rate conversion: motion interpolation when the source rate
    // divides unevenly below the target, direct conversion otherwise.
    if let Some(src) = source_fps
        && (src - canvas.fps).abs() > 1e-3
    {
        let remainder = canvas.fps % src;
        if src < canvas.fps && remainder > 0.1 {
            video.push(format!("minterpolate=fps={:.3}", canvas.fps));
        } else {
            video.push(format!("fps={:.3}", canvas.fps));
        }
    }

    for user in ordered(&settings.user_prefilters) {
        video.push(user.filter.clone());
    }
    for user in ordered(&settings.user_filters) {
        video.push(user.filter.clone());
    }

    // Pad to canvas is always last so frame geometry stays constant across
    // the whole session.
    video.push(format!(
        "pad=w={}:h={}:x=(ow-iw)/2:y=(oh-ih)/2:color=0x{}",
        canvas.width, canvas.height, plan.background
    ));

    for directive in plan.fades.directives() {
        if directive.track.covers_video() {
            video.push(fade_expr("fade", directive));
        }
    }

    video.push("format=yuv420p".to_string());
    let mut stages = video.finish("vo");

    if let Some(audio_id) = audio_id {
        let mut audio = Chain::new('a', format!("aid{}", audio_id + 1));

        match settings.channel_mode {
            ChannelMode::Default => {}
            ChannelMode::StereoMix => {
                audio.push("pan=stereo|c0=0.5*c0+0.5*c1|c1=0.5*c0+0.5*c1".to_string())
            }
            ChannelMode::Left => audio.push("pan=stereo|c0=c0|c1=c0".to_string()),
            ChannelMode::Right => audio.push("pan=stereo|c0=c1|c1=c1".to_string()),
        }

        if settings.audio_delay_ms > 0 {
            audio.push(format!("adelay={}:all=1", settings.audio_delay_ms));
        }

        audio.push("aresample=48000:async=1".to_string());

        if settings.normalize_loudness {
            audio.push("loudnorm=I=-23:LRA=7".to_string());
        }

        for directive in plan.fades.directives() {
            if directive.track.covers_audio() {
                audio.push(fade_expr("afade", directive));
            }
        }

        stages.extend(audio.finish("ao"));
    }

    Ok(FilterUpdate {
        graph: stages.join(";"),
        video_id,
        audio_id,
        subtitle_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fade::FadeTrack;
    use crate::media::StreamInfo;
    use crate::plan::PlaybackPlan;
    use crate::playlist::ItemSettings;

    fn canvas() -> Canvas {
        Canvas {
            width: 1280,
            height: 720,
            fps: 30.0,
        }
    }

    fn plan_with_av() -> PlaybackPlan {
        let mut plan = PlaybackPlan::skeleton("edl://x".into(), ItemSettings::default());
        plan.streams
            .register_stream(StreamInfo::new(MediaType::Video), false);
        plan.streams
            .register_stream(StreamInfo::new(MediaType::Audio), false);
        plan.streams.calculate_auto_ids();
        plan
    }

    #[test]
    fn video_chain_starts_at_selected_pad_and_ends_padded() {
        let plan = plan_with_av();
        let update = assemble(&plan, &LiveSettings::default(), canvas(), None).unwrap();
        assert!(update.graph.starts_with("[vid1]"), "{}", update.graph);
        assert!(update.graph.contains("[vo]"));
        assert!(update.graph.contains("[ao]"));
        let pad_pos = update.graph.find("pad=").unwrap();
        let scale_pos = update.graph.find("scale=").unwrap();
        assert!(scale_pos < pad_pos, "scale must run before pad");
        let format_pos = update.graph.find("format=yuv420p").unwrap();
        assert!(pad_pos < format_pos, "pad must run before final format");
    }

    #[test]
    fn degenerate_crop_is_skipped() {
        let plan = plan_with_av();
        let mut settings = LiveSettings::default();
        settings.crop_left = 0.5;
        settings.crop_right = 0.5;
        let update = assemble(&plan, &settings, canvas(), None).unwrap();
        assert!(!update.graph.contains("crop="), "{}", update.graph);

        settings.crop_right = 0.1;
        let update = assemble(&plan, &settings, canvas(), None).unwrap();
        assert!(update.graph.contains("crop="));
    }

    #[test]
    fn fps_conversion_picks_interpolation_for_uneven_rates() {
        let plan = plan_with_av();
        let update = assemble(&plan, &LiveSettings::default(), canvas(), Some(23.976)).unwrap();
        assert!(update.graph.contains("minterpolate=fps=30.000"));

        let update = assemble(&plan, &LiveSettings::default(), canvas(), Some(15.0)).unwrap();
        assert!(update.graph.contains("fps=30.000"));
        assert!(!update.graph.contains("minterpolate"));
    }

    #[test]
    fn fades_are_windowed_per_directive() {
        let mut plan = plan_with_av();
        plan.fades.fade_in(FadeTrack::All, 10.0, 1.0);
        plan.fades.fade_out(FadeTrack::All, 19.0, 1.0);
        let update = assemble(&plan, &LiveSettings::default(), canvas(), None).unwrap();
        assert!(update
            .graph
            .contains("fade=t=in:st=10.000:d=1.000:enable='between(t,10.000,11.000)'"));
        assert!(update
            .graph
            .contains("afade=t=out:st=19.000:d=1.000:enable='between(t,19.000,20.000)'"));
    }

    #[test]
    fn user_filters_follow_index_order() {
        let plan = plan_with_av();
        let mut settings = LiveSettings::default();
        settings.user_filters = vec![
            UserFilter {
                index: 2,
                filter: "unsharp".into(),
            },
            UserFilter {
                index: 1,
                filter: "hflip".into(),
            },
        ];
        let update = assemble(&plan, &settings, canvas(), None).unwrap();
        let hflip = update.graph.find("hflip").unwrap();
        let unsharp = update.graph.find("unsharp").unwrap();
        assert!(hflip < unsharp);
    }

    #[test]
    fn color_mapping_uses_native_ranges() {
        let plan = plan_with_av();
        let mut settings = LiveSettings::default();
        settings.brightness = 50.0;
        settings.contrast = -50.0;
        let update = assemble(&plan, &settings, canvas(), None).unwrap();
        assert!(update.graph.contains("brightness=0.5000"));
        assert!(update.graph.contains("contrast=0.5000"));
    }

    #[test]
    fn audio_only_plan_has_no_audio_chain_without_streams() {
        let mut plan = PlaybackPlan::skeleton("edl://x".into(), ItemSettings::default());
        plan.streams
            .register_stream(StreamInfo::new(MediaType::Video), false);
        plan.streams.calculate_auto_ids();
        let update = assemble(&plan, &LiveSettings::default(), canvas(), None).unwrap();
        assert!(update.audio_id.is_none());
        assert!(!update.graph.contains("[ao]"));
    }
}
