use crate::edl::{ClipSpec, EdlBuilder};
use crate::error::CompileError;
use crate::fade::{FadeTimeline, FadeTrack};
use crate::generate::{GenerateParams, GeneratedStore, MediaGenerator};
use crate::media::{MediaFile, MediaInfo, MediaProbe, MediaType, ProbeCache, StreamInfo};
use crate::plan::PlaybackPlan;
use crate::playlist::{
    PlaylistItem, PlaylistMode, SCHEME_EMPTY, SCHEME_INTERTITLE, SCHEME_LIVE, scheme_rest,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::path::Path;
use tracing::{debug, warn};

/// Length of generated placeholder media when no duration is known.
pub const NOMINAL_PLACEHOLDER_SECS: f64 = 60.0;

/// Session-level facts the compiler needs beyond the item tree.
#[derive(Clone, Debug)]
pub struct CompilerConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Fallback visuals for audio-only roots, tried in order after
    /// embedded/sidecar artwork.
    pub background_file: Option<String>,
    pub logo_file: Option<String>,
    /// Base address live pseudo-locators are rewritten onto.
    pub live_ingest_base: String,
    /// Session-scoped ingest key used when the locator carries none.
    pub session_key: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            width: 1280,
            height: 720,
            fps: 30.0,
            background_file: None,
            logo_file: None,
            live_ingest_base: "rtmp://127.0.0.1:1935/live".to_string(),
            session_key: "session".to_string(),
        }
    }
}

/// Per-call resolution options.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompileOpts {
    /// Timeline offset the resolved item starts at.
    pub offset: f64,
    /// Explicit duration override.
    pub duration: Option<f64>,
    /// Restrict resolution to one media type (type-filtered extraction).
    pub media_type: Option<MediaType>,
    /// Top-level item of a load.
    pub root: bool,
    /// Clip window imposed by the caller.
    pub clip: Option<ClipSpec>,
}

impl CompileOpts {
    pub fn root() -> Self {
        CompileOpts {
            root: true,
            ..CompileOpts::default()
        }
    }
}

/// Accumulator threaded through every resolution call: the shared fade
/// list and the single running timeline offset. Never ambient state.
struct ComposeCx {
    fades: FadeTimeline,
    offset: f64,
}

/// What one resolution pass learned about duration.
#[derive(Default)]
struct DurationFacts {
    /// Reported by the probe.
    probed: Option<f64>,
    /// Computed during this pass (composite, still-image clip, wrapper).
    computed: Option<f64>,
    /// The item flattened a sub-playlist.
    is_playlist: bool,
}

/// Recursive playlist resolver: turns one playlist item tree into a flat,
/// duration-exact playback plan.
pub struct PlanCompiler<P, G> {
    probe: ProbeCache<P>,
    store: GeneratedStore<G>,
    config: CompilerConfig,
}

impl<P: MediaProbe, G: MediaGenerator> PlanCompiler<P, G> {
    pub fn new(probe: ProbeCache<P>, store: GeneratedStore<G>, config: CompilerConfig) -> Self {
        PlanCompiler {
            probe,
            store,
            config,
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile one item tree into a plan. Recoverable content problems
    /// resolve to placeholders and a logged warning; only unrecoverable
    /// input fails.
    pub async fn compile(
        &self,
        item: &PlaylistItem,
        opts: CompileOpts,
    ) -> Result<PlaybackPlan, CompileError> {
        let mut cx = ComposeCx {
            fades: FadeTimeline::new(),
            offset: opts.offset,
        };
        let mut plan = self.resolve(item, opts, &mut cx).await?;
        plan.fades = cx.fades;
        plan.streams.calculate_auto_ids();
        if opts.root && plan.unknown_duration {
            // Free-run instead of halting on a nonexistent end.
            plan.settings.loop_forever = true;
        }
        debug!(
            locator = %plan.locator,
            duration = plan.duration,
            unknown = plan.unknown_duration,
            fades = plan.fades.len(),
            "plan compiled"
        );
        Ok(plan)
    }

    fn resolve<'s: 'f, 'f>(
        &'s self,
        item: &'f PlaylistItem,
        opts: CompileOpts,
        cx: &'f mut ComposeCx,
    ) -> BoxFuture<'f, Result<PlaybackPlan, CompileError>> {
        async move {
            let start_offset = cx.offset;
            let locator = item.effective_locator();
            let mut plan = PlaybackPlan::skeleton(locator.clone(), item.settings.clone());
            let mut facts = DurationFacts::default();
            let mut source_info: Option<MediaInfo> = None;

            let flatten_children = item.is_playlist()
                && (!opts.root || item.settings.playlist_mode != PlaylistMode::Individual);

            if flatten_children {
                let composite = self.flatten(item, opts, cx, &mut plan).await?;
                facts.is_playlist = true;
                facts.computed = composite;
            } else if let Some(rest) = scheme_rest(&locator, SCHEME_INTERTITLE) {
                let length = opts.duration.unwrap_or(NOMINAL_PLACEHOLDER_SECS);
                let text = rest.to_string();
                self.placeholder(&mut plan, Some(&text), length).await?;
            } else if scheme_rest(&locator, SCHEME_EMPTY).is_some() {
                let length = opts.duration.unwrap_or(NOMINAL_PLACEHOLDER_SECS);
                self.placeholder(&mut plan, None, length).await?;
            } else if let Some(rest) = scheme_rest(&locator, SCHEME_LIVE) {
                let key = if rest.is_empty() {
                    self.config.session_key.as_str()
                } else {
                    rest
                };
                plan.locator = format!("{}/{key}", self.config.live_ingest_base);
                plan.internal_seekable = false;
                plan.seekable = false;
                let mut video = StreamInfo::new(MediaType::Video);
                video.forced = true;
                plan.streams.register_stream(video, true);
                let mut audio = StreamInfo::new(MediaType::Audio);
                audio.forced = true;
                plan.streams.register_stream(audio, true);
            } else {
                self.resolve_source(&locator, opts, &mut plan, &mut facts, &mut source_info)
                    .await?;
            }

            // Pre-clip duration, used by root augmentation and fades.
            let known = opts.duration.or(facts.computed).or(facts.probed);

            if opts.root {
                self.augment_root(item, &mut plan, known, source_info.as_ref())
                    .await?;
            }

            // Fade scheduling appends to the root's shared list using this
            // item's running offset.
            cx.offset = start_offset;
            let track = match opts.media_type {
                None => Some(FadeTrack::All),
                Some(MediaType::Video) => Some(FadeTrack::Video),
                Some(MediaType::Audio) => Some(FadeTrack::Audio),
                Some(MediaType::Subtitle) => None,
            };
            if let Some(track) = track {
                if item.settings.fade_in > 0.0 {
                    cx.fades.fade_in(track, start_offset, item.settings.fade_in);
                }
                if item.settings.fade_out > 0.0
                    && let Some(total) = known
                {
                    cx.fades.fade_out(
                        track,
                        start_offset + total - item.settings.fade_out,
                        item.settings.fade_out,
                    );
                }
            }

            // Explicit clipping wraps the composed locator; the wrapper's
            // duration becomes authoritative.
            let mut known = known;
            if item.settings.has_clip() || opts.clip.is_some() {
                let spec = opts.clip.unwrap_or_else(|| item.settings.clip_spec());
                let mut wrapper = EdlBuilder::new();
                wrapper.clip(&plan.locator, &spec, known);
                let wrapped = wrapper.duration();
                let open_ended = wrapper.has_unknown_length();
                plan.locator = wrapper.into_uri();
                if !open_ended {
                    known = Some(wrapped);
                }
            }

            match known {
                Some(duration) => {
                    plan.duration = duration;
                    plan.unknown_duration = false;
                }
                None if facts.is_playlist => {
                    plan.duration = 0.0;
                    plan.unknown_duration = false;
                }
                None => {
                    plan.duration = 0.0;
                    plan.unknown_duration = true;
                    plan.seekable = false;
                }
            }

            Ok(plan)
        }
        .boxed()
    }

    /// Resolve a plain source locator: probe, detect still images, apply
    /// type-filtered extraction, register streams.
    async fn resolve_source(
        &self,
        locator: &str,
        opts: CompileOpts,
        plan: &mut PlaybackPlan,
        facts: &mut DurationFacts,
        info_out: &mut Option<MediaInfo>,
    ) -> Result<(), CompileError> {
        let info = self.probe.probe(locator).await;

        if !info.exists {
            warn!(locator, "source missing, substituting invalid-media placeholder");
            let length = opts.duration.unwrap_or(NOMINAL_PLACEHOLDER_SECS);
            return self.placeholder(plan, Some("invalid media"), length).await;
        }

        if info.needs_extraction {
            // Remote sources resolve their real streams at load time.
            plan.streams
                .register_stream(StreamInfo::new(MediaType::Video), false);
            plan.streams
                .register_stream(StreamInfo::new(MediaType::Audio), false);
            return Ok(());
        }

        facts.probed = info.duration;

        if info.is_still_image() {
            // Fixed-length generated clip; the engine holds the frame.
            let target = opts.duration.unwrap_or(NOMINAL_PLACEHOLDER_SECS);
            let mut builder = EdlBuilder::new();
            builder.clip(
                locator,
                &ClipSpec {
                    duration: Some(target),
                    ..ClipSpec::default()
                },
                None,
            );
            plan.locator = builder.into_uri();
            facts.computed = Some(target);
            for stream in info.streams_of(MediaType::Video) {
                plan.streams.register_stream(stream.clone(), false);
            }
            return Ok(());
        }

        match opts.media_type {
            Some(required) if !info.has_type(required) => {
                // Required-but-missing type: synthesize an exactly
                // duration-matched null placeholder.
                let length = opts
                    .duration
                    .or(info.duration)
                    .unwrap_or(NOMINAL_PLACEHOLDER_SECS);
                warn!(locator, %required, "required type missing, synthesizing null stream");
                plan.locator = self.null_locator(required, length).await?;
                plan.streams
                    .register_stream(StreamInfo::new(required), false);
                facts.computed = Some(length);
            }
            Some(required) if info.media_types() != vec![required] => {
                // Extract one type out of a multi-type source as an
                // explicit per-type segment.
                let mut builder = EdlBuilder::new();
                builder.no_chapters();
                builder.delay_open(required);
                builder.push_clip(locator, None, info.duration);
                plan.locator = builder.into_uri();
                for stream in info.streams_of(required) {
                    plan.streams.register_stream(stream.clone(), false);
                }
            }
            Some(required) => {
                for stream in info.streams_of(required) {
                    plan.streams.register_stream(stream.clone(), false);
                }
            }
            None => {
                plan.streams.register_file(&MediaFile {
                    locator: locator.to_string(),
                    title: file_title(locator),
                    streams: info.streams.clone(),
                    secondary: false,
                });
            }
        }

        // Carried out for root augmentation (artwork fallback chain).
        *info_out = Some(info);
        Ok(())
    }

    /// Flatten a sub-playlist into one composed source: per-track lanes,
    /// exit-sentinel capping, deficit padding, per-lane stream groups.
    async fn flatten(
        &self,
        item: &PlaylistItem,
        opts: CompileOpts,
        cx: &mut ComposeCx,
        plan: &mut PlaybackPlan,
    ) -> Result<Option<f64>, CompileError> {
        let children = item.children.as_deref().unwrap_or_default();
        let two_track = item.settings.playlist_mode == PlaylistMode::TwoTrack;
        let base_offset = cx.offset;

        // Lane slots: video / audio / subtitle. Single-track composition
        // uses only the video slot, undifferentiated.
        let mut lanes: [Lane; 3] = Default::default();
        let mut exit_cap: Option<f64> = None;

        for child in children {
            if child.is_exit() {
                let point = lanes
                    .iter()
                    .map(|l| l.duration)
                    .fold(0.0_f64, f64::max);
                // First exit sets the cap; later exits tighten it.
                exit_cap = Some(exit_cap.map_or(point, |cap| cap.min(point)));
                debug!(point, "exit sentinel capped composite duration");
                continue;
            }

            let (slot, media_type) = if two_track {
                let lane_type = self.route_lane(child).await;
                (lane_slot(lane_type), Some(lane_type))
            } else {
                (0, None)
            };

            cx.offset = base_offset + lanes[slot].duration;
            let child_opts = CompileOpts {
                offset: cx.offset,
                duration: None,
                media_type,
                root: false,
                clip: None,
            };
            let child_plan = self.resolve(child, child_opts, cx).await?;

            let lane = &mut lanes[slot];
            let length = (!child_plan.unknown_duration).then_some(child_plan.duration);
            lane.builder.push_clip(&child_plan.locator, None, length);
            lane.duration += child_plan.duration;
            lane.open_ended |= child_plan.unknown_duration;
            plan.internal_seekable &= child_plan.internal_seekable;
            plan.children.push(child_plan);
        }

        // Composite duration policy: explicit override, then exit cap,
        // then shortest/longest populated track.
        let populated: Vec<f64> = lanes
            .iter()
            .filter(|l| !l.builder.is_empty())
            .map(|l| l.duration)
            .collect();
        let natural = if populated.is_empty() {
            0.0
        } else if item.settings.end_on_shortest {
            populated.iter().cloned().fold(f64::INFINITY, f64::min)
        } else {
            populated.iter().cloned().fold(0.0, f64::max)
        };
        let composite = opts
            .duration
            .or(exit_cap.map(|cap| cap.min(natural).max(0.0)))
            .unwrap_or(natural);

        // Trim lanes past the composite, then pad lanes short of it.
        let video_lane_uri = (!lanes[0].builder.is_empty() && two_track)
            .then(|| lanes[0].builder.clone().into_uri());
        for (slot, lane) in lanes.iter_mut().enumerate() {
            if lane.builder.is_empty() {
                continue;
            }
            if lane.duration > composite {
                lane.builder.truncate(composite);
                lane.duration = composite;
            }
            let deficit = composite - lane.duration;
            if deficit <= 1e-6 || lane.open_ended {
                continue;
            }
            let lane_type = lane_type_of(slot);
            if lane_type == MediaType::Audio
                && item.settings.extend_audio
                && let Some(video_uri) = &video_lane_uri
            {
                // Replay the video track's audio after the audio ends.
                lane.builder
                    .push_clip(video_uri, Some(lane.duration), Some(deficit));
            } else {
                let filler_len = deficit.min(NOMINAL_PLACEHOLDER_SECS);
                let filler = self.null_locator(lane_type, filler_len).await?;
                lane.builder.pad(&filler, filler_len, deficit);
            }
            lane.duration = composite;
        }

        // Emit each non-empty lane as its own stream group.
        let mut master = EdlBuilder::new();
        master.no_chapters();
        let mut first = true;
        for (slot, lane) in lanes.iter().enumerate() {
            if lane.builder.is_empty() {
                continue;
            }
            if !first {
                master.new_stream();
            }
            if two_track {
                master.delay_open(lane_type_of(slot));
            }
            master.append(lane.builder.clone());
            first = false;
        }
        plan.locator = master.into_uri();

        // The composed source exposes one stream per contributing type.
        if two_track {
            for (slot, lane) in lanes.iter().enumerate() {
                if !lane.builder.is_empty() {
                    plan.streams
                        .register_stream(StreamInfo::new(lane_type_of(slot)), false);
                }
            }
        } else {
            for media_type in MediaType::ALL {
                if plan.children.iter().any(|c| c.streams.has_type(media_type)) {
                    plan.streams
                        .register_stream(StreamInfo::new(media_type), false);
                }
            }
        }

        cx.offset = base_offset;
        Ok(Some(composite))
    }

    /// Which lane a two-track child lands on: the lane of its primary
    /// media type.
    async fn route_lane(&self, child: &PlaylistItem) -> MediaType {
        if child.is_playlist() {
            return MediaType::Video;
        }
        let locator = child.effective_locator();
        if locator.contains("://") {
            return MediaType::Video;
        }
        let info = self.probe.probe(&locator).await;
        if info.has_type(MediaType::Video) || !info.exists {
            MediaType::Video
        } else if info.has_type(MediaType::Audio) {
            MediaType::Audio
        } else {
            MediaType::Subtitle
        }
    }

    /// Guarantee baseline video and audio on the top-level plan, then layer
    /// item-level file overrides as additional registered streams.
    async fn augment_root(
        &self,
        item: &PlaylistItem,
        plan: &mut PlaybackPlan,
        known: Option<f64>,
        source_info: Option<&MediaInfo>,
    ) -> Result<(), CompileError> {
        let window = known.unwrap_or(NOMINAL_PLACEHOLDER_SECS);
        let mut extra = EdlBuilder::new();

        let has_real_video = plan
            .streams
            .streams_of(MediaType::Video)
            .any(|s| !s.info.album_art);
        if !has_real_video {
            let sidecar =
                source_info.and_then(|info| info.artwork_sidecar().map(str::to_string));

            if plan.streams.has_type(MediaType::Video) {
                // Embedded artwork is the only video; make it selectable.
                plan.settings.art_mode = true;
            } else {
                let fallback = sidecar
                    .or_else(|| self.config.background_file.clone())
                    .or_else(|| self.config.logo_file.clone());
                let locator = match fallback {
                    Some(locator) => locator,
                    None => self.null_locator(MediaType::Video, window).await?,
                };
                plan.streams
                    .register_stream(StreamInfo::new(MediaType::Video), false);
                extra.new_stream();
                extra.delay_open(MediaType::Video);
                extra.push_clip(&locator, None, Some(window));
            }
        }

        if !plan.streams.has_type(MediaType::Audio) {
            let locator = self.null_locator(MediaType::Audio, window).await?;
            plan.streams
                .register_stream(StreamInfo::new(MediaType::Audio), false);
            extra.new_stream();
            extra.delay_open(MediaType::Audio);
            extra.push_clip(&locator, None, Some(window));
        }

        let overrides = [
            (MediaType::Video, item.settings.video_file.as_deref()),
            (MediaType::Audio, item.settings.audio_file.as_deref()),
            (MediaType::Subtitle, item.settings.subtitle_file.as_deref()),
        ];
        for (media_type, path) in overrides {
            let Some(path) = path else { continue };
            let info = self.probe.probe(path).await;
            if !info.exists {
                warn!(path, %media_type, "override file missing, skipped");
                continue;
            }
            let streams: Vec<StreamInfo> = info.streams_of(media_type).cloned().collect();
            if streams.is_empty() {
                warn!(path, %media_type, "override file has no stream of its type, skipped");
                continue;
            }
            plan.streams.register_file(&MediaFile {
                locator: path.to_string(),
                title: file_title(path),
                streams,
                secondary: media_type == MediaType::Subtitle,
            });
            // Independently clip-windowed to the root duration.
            extra.new_stream();
            extra.delay_open(media_type);
            extra.push_clip(path, None, Some(window));
        }

        if !extra.is_empty() {
            let mut master = EdlBuilder::new();
            master.no_chapters();
            master.push_clip(&plan.locator, None, known);
            master.append(extra);
            plan.locator = master.into_uri();
        }
        Ok(())
    }

    /// Compose the empty/intertitle placeholder: generated black video and
    /// silence, plus a forced title subtitle track when text is given.
    async fn placeholder(
        &self,
        plan: &mut PlaybackPlan,
        text: Option<&str>,
        length: f64,
    ) -> Result<(), CompileError> {
        let video = self.null_locator(MediaType::Video, length).await?;
        let audio = self.null_locator(MediaType::Audio, length).await?;

        let mut builder = EdlBuilder::new();
        builder.no_chapters();
        builder.delay_open(MediaType::Video);
        builder.push_clip(&video, None, Some(length));
        builder.new_stream();
        builder.delay_open(MediaType::Audio);
        builder.push_clip(&audio, None, Some(length));

        plan.streams
            .register_stream(StreamInfo::new(MediaType::Video), false);
        plan.streams
            .register_stream(StreamInfo::new(MediaType::Audio), false);

        if let Some(text) = text {
            let params = GenerateParams {
                media_type: MediaType::Subtitle,
                duration: length,
                width: self.config.width,
                height: self.config.height,
                background: "000000".to_string(),
                fps: None,
                text: Some(text.to_string()),
            };
            let subtitle =
                self.store
                    .generate(&params)
                    .await
                    .map_err(|source| CompileError::Generate {
                        media_type: MediaType::Subtitle,
                        source,
                    })?;
            builder.new_stream();
            builder.delay_open(MediaType::Subtitle);
            builder.push_clip(&subtitle, None, Some(length));
            let mut stream = StreamInfo::new(MediaType::Subtitle);
            stream.forced = true;
            stream.title = Some(text.to_string());
            plan.streams.register_stream(stream, true);
        }

        plan.locator = builder.into_uri();
        Ok(())
    }

    async fn null_locator(
        &self,
        media_type: MediaType,
        duration: f64,
    ) -> Result<String, CompileError> {
        let mut params = GenerateParams::null_stream(
            media_type,
            duration,
            self.config.width,
            self.config.height,
        );
        if media_type == MediaType::Video {
            params.fps = Some(self.config.fps);
        }
        self.store
            .generate(&params)
            .await
            .map_err(|source| CompileError::Generate { media_type, source })
    }
}

#[derive(Default, Clone)]
struct Lane {
    builder: EdlBuilder,
    duration: f64,
    /// A child with unknown duration leaves the lane open-ended.
    open_ended: bool,
}

fn lane_slot(media_type: MediaType) -> usize {
    match media_type {
        MediaType::Video => 0,
        MediaType::Audio => 1,
        MediaType::Subtitle => 2,
    }
}

fn lane_type_of(slot: usize) -> MediaType {
    match slot {
        0 => MediaType::Video,
        1 => MediaType::Audio,
        _ => MediaType::Subtitle,
    }
}

fn file_title(locator: &str) -> String {
    Path::new(locator)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(locator)
        .to_string()
}
