use serde_json::{Value, json};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::engine::{EndReason, Engine, EngineEvent};
use crate::error::PipelineError;
use crate::filter::{Canvas, LiveSettings, assemble};
use crate::generate::MediaGenerator;
use crate::media::MediaProbe;
use crate::plan::{CompileOpts, PlanCompiler, PlaybackPlan};
use crate::playlist::{PlaylistItem, PlaylistMode};

/// Session lifecycle. Engine events are the only transition triggers;
/// transitions out of `Destroyed` do not exist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Loading,
    Preloaded,
    Playing,
    Seeking,
    Fading,
    Destroyed,
}

/// Typed result of a load attempt, so callers can tell "superseded,
/// ignore" from "genuinely broken, skip forward".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// A newer load superseded this one before it completed.
    Override,
    /// The source ended immediately, typically invalid media.
    Ended,
    Failed,
}

/// What a settings change requires beyond writing the engine property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SideEffect {
    None,
    Reload,
    FilterRebuild,
    VolumeUpdate,
}

/// Signals the controller raises from engine events for the outer loop.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionSignal {
    /// The current item finished naturally; advance the playlist.
    Ended,
    /// The current item failed; skip forward.
    Failed,
    /// Recycle the whole engine + pipeline instance.
    Fatal(String),
}

struct PropertyRoute {
    setting: &'static str,
    engine_key: Option<&'static str>,
    effect: SideEffect,
}

/// Settings dispatch table. One dispatcher consults this instead of
/// branching inline per key.
const PROPERTY_TABLE: &[PropertyRoute] = &[
    PropertyRoute {
        setting: "volume",
        engine_key: Some("volume"),
        effect: SideEffect::VolumeUpdate,
    },
    PropertyRoute {
        setting: "mute",
        engine_key: Some("mute"),
        effect: SideEffect::None,
    },
    PropertyRoute {
        setting: "deinterlace",
        engine_key: Some("deinterlace"),
        effect: SideEffect::None,
    },
    PropertyRoute {
        setting: "speed",
        engine_key: Some("speed"),
        effect: SideEffect::None,
    },
    PropertyRoute {
        setting: "crop_left",
        engine_key: None,
        effect: SideEffect::FilterRebuild,
    },
    PropertyRoute {
        setting: "crop_right",
        engine_key: None,
        effect: SideEffect::FilterRebuild,
    },
    PropertyRoute {
        setting: "crop_top",
        engine_key: None,
        effect: SideEffect::FilterRebuild,
    },
    PropertyRoute {
        setting: "crop_bottom",
        engine_key: None,
        effect: SideEffect::FilterRebuild,
    },
    PropertyRoute {
        setting: "brightness",
        engine_key: None,
        effect: SideEffect::FilterRebuild,
    },
    PropertyRoute {
        setting: "contrast",
        engine_key: None,
        effect: SideEffect::FilterRebuild,
    },
    PropertyRoute {
        setting: "saturation",
        engine_key: None,
        effect: SideEffect::FilterRebuild,
    },
    PropertyRoute {
        setting: "gamma",
        engine_key: None,
        effect: SideEffect::FilterRebuild,
    },
    PropertyRoute {
        setting: "hue",
        engine_key: None,
        effect: SideEffect::FilterRebuild,
    },
    PropertyRoute {
        setting: "channel_mode",
        engine_key: None,
        effect: SideEffect::FilterRebuild,
    },
    PropertyRoute {
        setting: "audio_delay_ms",
        engine_key: None,
        effect: SideEffect::FilterRebuild,
    },
    PropertyRoute {
        setting: "normalize_loudness",
        engine_key: None,
        effect: SideEffect::FilterRebuild,
    },
    PropertyRoute {
        setting: "video_stream",
        engine_key: None,
        effect: SideEffect::Reload,
    },
    PropertyRoute {
        setting: "audio_stream",
        engine_key: None,
        effect: SideEffect::Reload,
    },
    PropertyRoute {
        setting: "subtitle_stream",
        engine_key: None,
        effect: SideEffect::Reload,
    },
    PropertyRoute {
        setting: "playlist_mode",
        engine_key: None,
        effect: SideEffect::Reload,
    },
    PropertyRoute {
        setting: "art_mode",
        engine_key: None,
        effect: SideEffect::Reload,
    },
];

fn route_for(setting: &str) -> Option<&'static PropertyRoute> {
    PROPERTY_TABLE.iter().find(|route| route.setting == setting)
}

/// Walks the top-level positions of a stepped playlist. Non-playlist
/// roots and merged roots are one single position.
pub struct PlaylistCursor {
    root: PlaylistItem,
    position: usize,
}

impl PlaylistCursor {
    pub fn new(root: PlaylistItem) -> Self {
        PlaylistCursor { root, position: 0 }
    }

    fn stepped(&self) -> Option<&[PlaylistItem]> {
        (self.root.is_playlist()
            && self.root.settings.playlist_mode == PlaylistMode::Individual)
            .then(|| self.root.children.as_deref())
            .flatten()
    }

    pub fn current(&self) -> Option<&PlaylistItem> {
        match self.stepped() {
            Some(children) => children.get(self.position),
            None if self.position == 0 => Some(&self.root),
            None => None,
        }
    }

    pub fn advance(&mut self) -> Option<&PlaylistItem> {
        self.position += 1;
        self.current()
    }
}

/// Mutable session facts. Guarded by one mutex that is never held across
/// an engine call, so a newer load can overtake a blocked one.
struct SessionInner {
    live: LiveSettings,
    state: SessionState,
    plan: Option<PlaybackPlan>,
    /// Monotonic load counter. Completions carrying a stale value are
    /// discarded silently.
    load_seq: u64,
}

/// Owns plan compilation and the engine's property surface. The compiler
/// and filter assembler only produce data; every engine call funnels
/// through here, and the property set has exactly this one writer.
pub struct SessionController<E, P, G> {
    engine: E,
    compiler: PlanCompiler<P, G>,
    canvas: Canvas,
    inner: Mutex<SessionInner>,
}

impl<E: Engine, P: MediaProbe, G: MediaGenerator> SessionController<E, P, G> {
    pub fn new(engine: E, compiler: PlanCompiler<P, G>, canvas: Canvas) -> Self {
        SessionController {
            engine,
            compiler,
            canvas,
            inner: Mutex::new(SessionInner {
                live: LiveSettings::default(),
                state: SessionState::Idle,
                plan: None,
                load_seq: 0,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    pub fn plan(&self) -> Option<PlaybackPlan> {
        self.inner().plan.clone()
    }

    pub fn live_settings(&self) -> LiveSettings {
        self.inner().live.clone()
    }

    /// Compile and load one playlist item. A load issued while another is
    /// still in flight supersedes it; the older completion becomes a no-op.
    pub async fn load(&self, item: &PlaylistItem) -> LoadOutcome {
        let seq = {
            let mut inner = self.inner();
            if inner.state == SessionState::Destroyed {
                return LoadOutcome::Failed;
            }
            inner.load_seq += 1;
            inner.state = SessionState::Loading;
            inner.load_seq
        };

        if seq == 1 {
            // One-time property subscriptions, before the first load.
            for key in ["eof-reached", "core-idle"] {
                if let Err(err) = self.engine.observe(key).await {
                    warn!(%err, key, "property subscription failed");
                }
            }
        }

        let plan = match self.compiler.compile(item, CompileOpts::root()).await {
            Ok(plan) => plan,
            Err(err) => {
                warn!(%err, locator = %item.effective_locator(), "plan compilation failed");
                return LoadOutcome::Failed;
            }
        };
        let current = self.inner().load_seq;
        if seq != current {
            debug!(seq, current, "stale compile discarded");
            return LoadOutcome::Override;
        }

        info!(locator = %plan.locator, duration = plan.duration, "loading plan");
        if let Err(err) = self.engine.load(&plan.locator).await {
            warn!(%err, "engine rejected load");
            return LoadOutcome::Failed;
        }
        {
            let mut inner = self.inner();
            if seq != inner.load_seq {
                debug!(seq, current = inner.load_seq, "stale load discarded");
                return LoadOutcome::Override;
            }
            inner.plan = Some(plan);
        }

        if let Err(err) = self.push_filters().await {
            warn!(%err, "filter snapshot push failed after load");
        }
        let mut inner = self.inner();
        if seq != inner.load_seq {
            return LoadOutcome::Override;
        }
        inner.state = SessionState::Preloaded;
        LoadOutcome::Loaded
    }

    /// Mark the session as fading out ahead of an item boundary.
    pub fn begin_fade(&self) {
        let mut inner = self.inner();
        if inner.state == SessionState::Playing {
            inner.state = SessionState::Fading;
        }
    }

    /// Drive the state machine from one engine event. Returns a signal
    /// when the outer loop has to act.
    pub fn handle_event(&self, event: &EngineEvent) -> Option<SessionSignal> {
        let mut inner = self.inner();
        if inner.state == SessionState::Destroyed {
            return None;
        }
        match event {
            EngineEvent::PlaybackRestart => {
                debug!(state = ?inner.state, "playback restart");
                inner.state = SessionState::Playing;
                None
            }
            EngineEvent::Seek => {
                if inner.state == SessionState::Playing {
                    inner.state = SessionState::Seeking;
                }
                None
            }
            EngineEvent::EndOfFile(reason) => match reason {
                EndReason::Stop => {
                    // The replaced load reports a stop; the newer load owns
                    // the session now.
                    debug!("end-of-file from superseded load");
                    None
                }
                EndReason::Eof => {
                    inner.state = SessionState::Idle;
                    Some(SessionSignal::Ended)
                }
                EndReason::Error => {
                    inner.state = SessionState::Idle;
                    Some(SessionSignal::Failed)
                }
            },
            EngineEvent::PropertyChange { name, value } => {
                debug!(name = %name, ?value, "property change");
                None
            }
            EngineEvent::Log { level, text } => {
                if level == "fatal" {
                    Some(SessionSignal::Fatal(text.clone()))
                } else {
                    None
                }
            }
        }
    }

    /// Play a stepped root to completion: load each position, feed engine
    /// events through the state machine, and advance across item
    /// boundaries. An engine fatal comes back as an error so the owner can
    /// recycle the engine together with the delivery pipeline.
    pub async fn run_playlist(&self, cursor: &mut PlaylistCursor) -> Result<(), PipelineError> {
        let events = self.engine.events();
        while let Some(item) = cursor.current().cloned() {
            match self.load(&item).await {
                LoadOutcome::Loaded => {}
                // The newer load owns the session; re-check the cursor.
                LoadOutcome::Override => continue,
                LoadOutcome::Ended | LoadOutcome::Failed => {
                    warn!(item = %item.id, "item failed to load, skipping forward");
                    cursor.advance();
                    continue;
                }
            }
            loop {
                let Ok(event) = events.recv().await else {
                    return Err(PipelineError::EngineFatal(
                        "engine event stream closed".to_string(),
                    ));
                };
                match self.handle_event(&event) {
                    Some(SessionSignal::Ended) | Some(SessionSignal::Failed) => {
                        cursor.advance();
                        break;
                    }
                    Some(SessionSignal::Fatal(text)) => {
                        return Err(PipelineError::EngineFatal(text));
                    }
                    None => {}
                }
            }
        }
        info!("playlist exhausted");
        Ok(())
    }

    /// Apply one settings change through the dispatch table. Unknown keys
    /// are rejected; filter-affecting keys update the live settings and
    /// push a fresh snapshot.
    pub async fn apply_setting(&self, name: &str, value: Value) -> anyhow::Result<SideEffect> {
        let route = route_for(name).ok_or_else(|| anyhow::anyhow!("unknown setting: {name}"))?;

        self.absorb_live_setting(name, &value)?;

        if let Some(key) = route.engine_key {
            self.engine.set_property(key, value).await?;
        }
        match route.effect {
            SideEffect::FilterRebuild => self.push_filters().await?,
            SideEffect::VolumeUpdate | SideEffect::None => {}
            // Reload needs the playlist item, which the outer loop owns.
            SideEffect::Reload => {}
        }
        Ok(route.effect)
    }

    fn absorb_live_setting(&self, name: &str, value: &Value) -> anyhow::Result<()> {
        let bad = || anyhow::anyhow!("invalid value for {name}");
        let mut inner = self.inner();
        let live = &mut inner.live;
        match name {
            "crop_left" => live.crop_left = value.as_f64().ok_or_else(bad)?,
            "crop_right" => live.crop_right = value.as_f64().ok_or_else(bad)?,
            "crop_top" => live.crop_top = value.as_f64().ok_or_else(bad)?,
            "crop_bottom" => live.crop_bottom = value.as_f64().ok_or_else(bad)?,
            "brightness" => live.brightness = value.as_f64().ok_or_else(bad)?,
            "contrast" => live.contrast = value.as_f64().ok_or_else(bad)?,
            "saturation" => live.saturation = value.as_f64().ok_or_else(bad)?,
            "gamma" => live.gamma = value.as_f64().ok_or_else(bad)?,
            "hue" => live.hue = value.as_f64().ok_or_else(bad)?,
            "audio_delay_ms" => live.audio_delay_ms = value.as_i64().ok_or_else(bad)?,
            "normalize_loudness" => live.normalize_loudness = value.as_bool().ok_or_else(bad)?,
            "channel_mode" => {
                live.channel_mode = serde_json::from_value(value.clone())?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Assemble the filter graph for the current plan and hand it to the
    /// engine as one immutable snapshot.
    pub async fn push_filters(&self) -> anyhow::Result<()> {
        let update = {
            let inner = self.inner();
            let Some(plan) = &inner.plan else {
                return Ok(());
            };
            let source_fps = plan.streams.primary_fps();
            assemble(plan, &inner.live, self.canvas, source_fps)?
        };
        debug!(
            video_id = update.video_id,
            audio_id = ?update.audio_id,
            "pushing filter snapshot"
        );
        self.engine
            .set_property("lavfi-complex", json!(update.graph))
            .await?;
        self.engine
            .set_property("vid", json!(update.video_id + 1))
            .await?;
        match update.audio_id {
            Some(id) => self.engine.set_property("aid", json!(id + 1)).await?,
            None => self.engine.set_property("aid", json!("no")).await?,
        }
        match update.subtitle_id {
            Some(id) => self.engine.set_property("sid", json!(id + 1)).await?,
            None => self.engine.set_property("sid", json!("no")).await?,
        }
        Ok(())
    }

    pub async fn seek(&self, time: f64) -> anyhow::Result<()> {
        {
            let mut inner = self.inner();
            let seekable = inner.plan.as_ref().map(|p| p.seekable).unwrap_or(false);
            if !seekable {
                anyhow::bail!("current plan is not seekable");
            }
            inner.state = SessionState::Seeking;
        }
        self.engine.seek(time).await
    }

    /// Tear the session down. The engine goes first so the pipeline can
    /// drain whatever output the dying process still buffered; the plan is
    /// released last.
    pub async fn destroy(&self) {
        {
            let mut inner = self.inner();
            if inner.state == SessionState::Destroyed {
                return;
            }
            inner.state = SessionState::Destroyed;
        }
        if let Err(err) = self.engine.command("quit", &[]).await {
            debug!(%err, "engine quit command failed");
        }
        self.inner().plan = None;
        info!("session destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scripted::{Call, ScriptedEngine};
    use crate::generate::{GenerateParams, GeneratedStore, MediaGenerator};
    use crate::media::{MediaInfo, MediaProbe, MediaType, ProbeCache, StreamInfo};
    use crate::plan::CompilerConfig;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Semaphore;

    struct FakeProbe;

    impl MediaProbe for FakeProbe {
        async fn probe(&self, locator: &str) -> anyhow::Result<MediaInfo> {
            Ok(MediaInfo {
                locator: locator.to_string(),
                exists: true,
                duration: Some(10.0),
                streams: vec![
                    StreamInfo::new(MediaType::Video),
                    StreamInfo::new(MediaType::Audio),
                ],
                external_files: Vec::new(),
                needs_extraction: false,
            })
        }
    }

    struct FakeGenerator;

    impl MediaGenerator for FakeGenerator {
        async fn generate(&self, params: &GenerateParams) -> anyhow::Result<String> {
            Ok(format!("/tmp/gen/{}", params.cache_key()))
        }
    }

    fn controller<E: Engine>(engine: E) -> SessionController<E, FakeProbe, FakeGenerator> {
        let compiler = PlanCompiler::new(
            ProbeCache::new(FakeProbe),
            GeneratedStore::new(FakeGenerator),
            CompilerConfig::default(),
        );
        let canvas = Canvas {
            width: 1280,
            height: 720,
            fps: 25.0,
        };
        SessionController::new(engine, compiler, canvas)
    }

    /// Records like the scripted engine, but the first load parks on a
    /// gate after being recorded so another load can overtake it.
    struct GatedEngine {
        inner: ScriptedEngine,
        gate: Semaphore,
        block_first: AtomicBool,
    }

    impl GatedEngine {
        fn new() -> Self {
            GatedEngine {
                inner: ScriptedEngine::new(),
                gate: Semaphore::new(0),
                block_first: AtomicBool::new(true),
            }
        }
    }

    impl Engine for GatedEngine {
        async fn load(&self, locator: &str) -> anyhow::Result<()> {
            self.inner.load(locator).await?;
            if self.block_first.swap(false, Ordering::SeqCst) {
                let _permit = self.gate.acquire().await?;
            }
            Ok(())
        }

        async fn set_property(&self, name: &str, value: Value) -> anyhow::Result<()> {
            self.inner.set_property(name, value).await
        }

        async fn observe(&self, name: &str) -> anyhow::Result<()> {
            self.inner.observe(name).await
        }

        async fn seek(&self, time: f64) -> anyhow::Result<()> {
            self.inner.seek(time).await
        }

        async fn command(&self, name: &str, args: &[Value]) -> anyhow::Result<()> {
            self.inner.command(name, args).await
        }

        fn events(&self) -> async_channel::Receiver<EngineEvent> {
            self.inner.events()
        }
    }

    #[tokio::test]
    async fn load_transitions_through_loading_to_playing() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = controller(engine.clone());

        let outcome = session.load(&PlaylistItem::new("a", "/media/a.mp4")).await;
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(session.state(), SessionState::Preloaded);
        assert_eq!(engine.loads().len(), 1);
        assert!(engine.calls().contains(&Call::Observe("eof-reached".into())));

        let signal = session.handle_event(&EngineEvent::PlaybackRestart);
        assert!(signal.is_none());
        assert_eq!(session.state(), SessionState::Playing);

        session.begin_fade();
        assert_eq!(session.state(), SessionState::Fading);
        session.handle_event(&EngineEvent::PlaybackRestart);
        assert_eq!(session.state(), SessionState::Playing);
    }

    #[tokio::test]
    async fn load_pushes_one_filter_snapshot() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = controller(engine.clone());
        session.load(&PlaylistItem::new("a", "/media/a.mp4")).await;

        let graphs: Vec<_> = engine
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::SetProperty(name, _) if name == "lavfi-complex"))
            .collect();
        assert_eq!(graphs.len(), 1);
    }

    #[tokio::test]
    async fn rejected_load_reports_failed() {
        let engine = Arc::new(ScriptedEngine::new());
        engine.fail_next_loads(true);
        let session = controller(engine.clone());
        let outcome = session.load(&PlaylistItem::new("a", "/media/a.mp4")).await;
        assert_eq!(outcome, LoadOutcome::Failed);
        assert!(session.plan().is_none());
    }

    #[tokio::test]
    async fn superseded_load_completion_is_a_noop() {
        let engine = Arc::new(GatedEngine::new());
        let session = Arc::new(controller(engine.clone()));

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.load(&PlaylistItem::new("a", "/media/a.mp4")).await })
        };
        // Wait until the first load is parked inside the engine.
        while engine.inner.loads().is_empty() {
            tokio::task::yield_now().await;
        }

        let second = session.load(&PlaylistItem::new("b", "/media/b.mp4")).await;
        assert_eq!(second, LoadOutcome::Loaded);

        engine.gate.add_permits(1);
        let first = first.await.unwrap();
        assert_eq!(first, LoadOutcome::Override);

        // The newer load still owns the session.
        assert_eq!(session.state(), SessionState::Preloaded);
        let plan = session.plan().expect("plan from the newer load");
        assert!(plan.locator.contains("b.mp4"));
    }

    #[tokio::test]
    async fn end_of_file_maps_to_typed_signals() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = controller(engine.clone());
        session.load(&PlaylistItem::new("a", "/media/a.mp4")).await;
        session.handle_event(&EngineEvent::PlaybackRestart);

        // A stop from a superseded load is silent.
        let signal = session.handle_event(&EngineEvent::EndOfFile(EndReason::Stop));
        assert!(signal.is_none());

        let signal = session.handle_event(&EngineEvent::EndOfFile(EndReason::Eof));
        assert_eq!(signal, Some(SessionSignal::Ended));

        let signal = session.handle_event(&EngineEvent::EndOfFile(EndReason::Error));
        assert_eq!(signal, Some(SessionSignal::Failed));
    }

    #[tokio::test]
    async fn fatal_log_line_raises_fatal_signal() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = controller(engine.clone());
        let signal = session.handle_event(&EngineEvent::Log {
            level: "fatal".into(),
            text: "decoder died".into(),
        });
        assert_eq!(signal, Some(SessionSignal::Fatal("decoder died".into())));

        let signal = session.handle_event(&EngineEvent::Log {
            level: "warn".into(),
            text: "late frame".into(),
        });
        assert!(signal.is_none());
    }

    #[tokio::test]
    async fn playlist_driver_steps_items_and_surfaces_fatal() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = controller(engine.clone());

        let mut root = PlaylistItem::new("root", "");
        root.locator = None;
        root.settings.playlist_mode = PlaylistMode::Individual;
        root.children = Some(vec![
            PlaylistItem::new("a", "/media/a.mp4"),
            PlaylistItem::new("b", "/media/b.mp4"),
        ]);
        let mut cursor = PlaylistCursor::new(root);

        // First item plays and ends, the second dies fatally.
        engine.push_event(EngineEvent::PlaybackRestart);
        engine.push_event(EngineEvent::EndOfFile(EndReason::Eof));
        engine.push_event(EngineEvent::PlaybackRestart);
        engine.push_event(EngineEvent::Log {
            level: "fatal".into(),
            text: "decoder died".into(),
        });

        let result = session.run_playlist(&mut cursor).await;
        assert!(matches!(result, Err(PipelineError::EngineFatal(_))));
        assert_eq!(engine.loads(), ["/media/a.mp4", "/media/b.mp4"]);
    }

    #[tokio::test]
    async fn playlist_driver_finishes_when_positions_run_out() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = controller(engine.clone());

        let mut root = PlaylistItem::new("root", "");
        root.locator = None;
        root.children = Some(vec![PlaylistItem::new("a", "/media/a.mp4")]);
        let mut cursor = PlaylistCursor::new(root);

        engine.push_event(EngineEvent::PlaybackRestart);
        engine.push_event(EngineEvent::EndOfFile(EndReason::Eof));

        let result = session.run_playlist(&mut cursor).await;
        assert!(result.is_ok());
        assert_eq!(engine.loads(), ["/media/a.mp4"]);
        assert!(cursor.current().is_none());
    }

    #[tokio::test]
    async fn settings_dispatch_follows_the_table() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = controller(engine.clone());
        session.load(&PlaylistItem::new("a", "/media/a.mp4")).await;

        let effect = session.apply_setting("volume", json!(80)).await.unwrap();
        assert_eq!(effect, SideEffect::VolumeUpdate);
        assert!(
            engine
                .calls()
                .contains(&Call::SetProperty("volume".into(), json!(80)))
        );

        let before = engine.calls().len();
        let effect = session
            .apply_setting("brightness", json!(25.0))
            .await
            .unwrap();
        assert_eq!(effect, SideEffect::FilterRebuild);
        // A rebuild pushes a fresh graph snapshot.
        let pushed = engine.calls()[before..]
            .iter()
            .any(|call| matches!(call, Call::SetProperty(name, _) if name == "lavfi-complex"));
        assert!(pushed);

        let effect = session
            .apply_setting("audio_stream", json!(1))
            .await
            .unwrap();
        assert_eq!(effect, SideEffect::Reload);

        assert!(session.apply_setting("bogus", json!(1)).await.is_err());
    }

    #[tokio::test]
    async fn seek_requires_a_seekable_plan() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = controller(engine.clone());
        assert!(session.seek(5.0).await.is_err());

        session.load(&PlaylistItem::new("a", "/media/a.mp4")).await;
        session.handle_event(&EngineEvent::PlaybackRestart);
        session.seek(5.0).await.unwrap();
        assert_eq!(session.state(), SessionState::Seeking);
        assert!(engine.calls().contains(&Call::Seek(5.0)));

        session.handle_event(&EngineEvent::PlaybackRestart);
        assert_eq!(session.state(), SessionState::Playing);
    }

    #[tokio::test]
    async fn destroyed_sessions_ignore_everything() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = controller(engine.clone());
        session.destroy().await;
        assert_eq!(session.state(), SessionState::Destroyed);
        assert!(
            engine
                .calls()
                .contains(&Call::Command("quit".into(), vec![]))
        );

        let signal = session.handle_event(&EngineEvent::EndOfFile(EndReason::Eof));
        assert!(signal.is_none());
        let outcome = session.load(&PlaylistItem::new("a", "/media/a.mp4")).await;
        assert_eq!(outcome, LoadOutcome::Failed);
    }
}
