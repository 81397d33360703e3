use crate::error::CompileError;
use crate::media::{MediaFile, MediaType, StreamInfo};
use tracing::warn;

/// One elementary stream registered into a plan's map.
#[derive(Clone, Debug)]
pub struct RegisteredStream {
    /// Globally unique across the whole map, in registration order.
    pub id: usize,
    /// Unique within the stream's media type, in registration order.
    pub type_id: usize,
    pub info: StreamInfo,
    /// Secondary streams auto-select only when no primary of the same type
    /// exists.
    pub secondary: bool,
}

/// Per-type registry tracking the computed default winner and any explicit
/// forced override.
#[derive(Clone, Debug)]
pub struct StreamCollection {
    media_type: MediaType,
    /// Global ids of this type's streams, indexed by type-local id.
    members: Vec<usize>,
    auto_id: Option<usize>,
    force_id: Option<usize>,
}

impl StreamCollection {
    fn new(media_type: MediaType) -> Self {
        StreamCollection {
            media_type,
            members: Vec::new(),
            auto_id: None,
            force_id: None,
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Type-local id of the computed default winner.
    pub fn auto_id(&self) -> Option<usize> {
        self.auto_id
    }

    /// Type-local id of the explicitly forced default, if any.
    pub fn force_id(&self) -> Option<usize> {
        self.force_id
    }

    /// Forced override beats the computed winner.
    pub fn effective_default(&self) -> Option<usize> {
        self.force_id.or(self.auto_id)
    }
}

/// A logical file that contributed streams to the map.
#[derive(Clone, Debug)]
pub struct LogicalFile {
    pub locator: String,
    pub title: String,
    pub stream_ids: Vec<usize>,
}

/// Registry of all elementary streams behind one compiled plan. Built once
/// per plan and discarded with it; all operations are append-only.
#[derive(Clone, Debug, Default)]
pub struct StreamMap {
    streams: Vec<RegisteredStream>,
    files: Vec<LogicalFile>,
    collections: Vec<StreamCollection>,
}

impl StreamMap {
    pub fn new() -> Self {
        StreamMap {
            streams: Vec::new(),
            files: Vec::new(),
            collections: MediaType::ALL.into_iter().map(StreamCollection::new).collect(),
        }
    }

    pub fn collection(&self, media_type: MediaType) -> &StreamCollection {
        &self.collections[Self::slot(media_type)]
    }

    fn collection_mut(&mut self, media_type: MediaType) -> &mut StreamCollection {
        &mut self.collections[Self::slot(media_type)]
    }

    fn slot(media_type: MediaType) -> usize {
        match media_type {
            MediaType::Video => 0,
            MediaType::Audio => 1,
            MediaType::Subtitle => 2,
        }
    }

    pub fn streams(&self) -> &[RegisteredStream] {
        &self.streams
    }

    pub fn files(&self) -> &[LogicalFile] {
        &self.files
    }

    pub fn streams_of(&self, media_type: MediaType) -> impl Iterator<Item = &RegisteredStream> {
        self.collection(media_type)
            .members
            .iter()
            .map(|&id| &self.streams[id])
    }

    /// Frame rate of the first video stream that reported one.
    pub fn primary_fps(&self) -> Option<f64> {
        self.streams_of(MediaType::Video).find_map(|s| s.info.fps)
    }

    pub fn has_type(&self, media_type: MediaType) -> bool {
        !self.collection(media_type).is_empty()
    }

    /// Register one stream; returns its global id. `force` marks it as the
    /// forced default of its type.
    pub fn register_stream(&mut self, info: StreamInfo, force: bool) -> usize {
        self.register_stream_inner(info, force, false)
    }

    fn register_stream_inner(&mut self, info: StreamInfo, force: bool, secondary: bool) -> usize {
        let id = self.streams.len();
        let media_type = info.media_type;
        let collection = self.collection_mut(media_type);
        let type_id = collection.members.len();
        collection.members.push(id);
        if force {
            collection.force_id = Some(type_id);
        }
        self.streams.push(RegisteredStream {
            id,
            type_id,
            info,
            secondary,
        });
        id
    }

    /// Register every stream a file contributes, prefixing stream titles
    /// with the file's display name.
    pub fn register_file(&mut self, file: &MediaFile) {
        let mut stream_ids = Vec::with_capacity(file.streams.len());
        for stream in &file.streams {
            let mut info = stream.clone();
            info.title = Some(match &info.title {
                Some(title) => format!("{}: {title}", file.title),
                None => file.title.clone(),
            });
            let secondary = file.secondary && info.media_type == MediaType::Subtitle;
            stream_ids.push(self.register_stream_inner(info, false, secondary));
        }
        self.files.push(LogicalFile {
            locator: file.locator.clone(),
            title: file.title.clone(),
            stream_ids,
        });
    }

    /// Default-selection rule: forced beats default beats earliest
    /// registration. Secondary streams only compete when no primary exists.
    pub fn calculate_auto_ids(&mut self) {
        for media_type in MediaType::ALL {
            let winner = self
                .best_of(media_type, false)
                .or_else(|| self.best_of(media_type, true));
            self.collection_mut(media_type).auto_id = winner;
        }
    }

    fn best_of(&self, media_type: MediaType, secondary: bool) -> Option<usize> {
        self.streams_of(media_type)
            .filter(|s| s.secondary == secondary)
            .min_by_key(|s| (!s.info.forced, !s.info.default, s.type_id))
            .map(|s| s.type_id)
    }

    fn eligible(stream: &RegisteredStream, art_mode: bool) -> bool {
        !stream.info.album_art || art_mode
    }

    /// Resolve a type-local selection, honoring an explicit override when it
    /// points at an eligible stream and falling back to the first eligible
    /// candidate otherwise. Album-art video is ineligible outside art mode.
    pub fn select(
        &self,
        media_type: MediaType,
        override_id: Option<usize>,
        art_mode: bool,
    ) -> Result<usize, CompileError> {
        if let Some(wanted) = override_id {
            match self
                .streams_of(media_type)
                .find(|s| s.type_id == wanted)
            {
                Some(stream) if Self::eligible(stream, art_mode) => return Ok(wanted),
                Some(stream) => warn!(
                    %media_type,
                    type_id = wanted,
                    album_art = stream.info.album_art,
                    "selected stream ineligible, falling back"
                ),
                None => warn!(%media_type, type_id = wanted, "selected stream missing, falling back"),
            }
        }

        self.streams_of(media_type)
            .filter(|s| Self::eligible(s, art_mode))
            .min_by_key(|s| (!s.info.forced, !s.info.default, s.type_id))
            .map(|s| s.type_id)
            .ok_or(CompileError::NoEligibleStream { media_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(media_type: MediaType) -> StreamInfo {
        StreamInfo::new(media_type)
    }

    #[test]
    fn ids_follow_registration_order() {
        let mut map = StreamMap::new();
        let v0 = map.register_stream(stream(MediaType::Video), false);
        let a0 = map.register_stream(stream(MediaType::Audio), false);
        let v1 = map.register_stream(stream(MediaType::Video), false);
        assert_eq!((v0, a0, v1), (0, 1, 2));
        assert_eq!(map.streams()[v1].type_id, 1);
        assert_eq!(map.streams()[a0].type_id, 0);
    }

    #[test]
    fn auto_id_prefers_forced_then_default_then_first() {
        let mut map = StreamMap::new();
        map.register_stream(stream(MediaType::Audio), false);
        let mut default = stream(MediaType::Audio);
        default.default = true;
        map.register_stream(default, false);
        let mut forced = stream(MediaType::Audio);
        forced.forced = true;
        map.register_stream(forced, false);
        map.calculate_auto_ids();
        assert_eq!(map.collection(MediaType::Audio).auto_id(), Some(2));

        let mut map = StreamMap::new();
        map.register_stream(stream(MediaType::Audio), false);
        let mut default = stream(MediaType::Audio);
        default.default = true;
        map.register_stream(default, false);
        map.calculate_auto_ids();
        assert_eq!(map.collection(MediaType::Audio).auto_id(), Some(1));

        let mut map = StreamMap::new();
        map.register_stream(stream(MediaType::Audio), false);
        map.register_stream(stream(MediaType::Audio), false);
        map.calculate_auto_ids();
        assert_eq!(map.collection(MediaType::Audio).auto_id(), Some(0));
    }

    #[test]
    fn force_registration_wins_over_auto() {
        let mut map = StreamMap::new();
        let mut default = stream(MediaType::Video);
        default.default = true;
        map.register_stream(default, false);
        map.register_stream(stream(MediaType::Video), true);
        map.calculate_auto_ids();
        let collection = map.collection(MediaType::Video);
        assert_eq!(collection.auto_id(), Some(0));
        assert_eq!(collection.force_id(), Some(1));
        assert_eq!(collection.effective_default(), Some(1));
    }

    #[test]
    fn album_art_override_falls_back_to_real_stream() {
        let mut map = StreamMap::new();
        let mut art = stream(MediaType::Video);
        art.album_art = true;
        map.register_stream(art, false);
        map.register_stream(stream(MediaType::Video), false);

        // Override points at the art stream while art mode is off.
        let picked = map.select(MediaType::Video, Some(0), false).unwrap();
        assert_eq!(picked, 1);

        // With art mode on the override is honored.
        let picked = map.select(MediaType::Video, Some(0), true).unwrap();
        assert_eq!(picked, 0);
    }

    #[test]
    fn select_fails_when_nothing_is_eligible() {
        let mut map = StreamMap::new();
        let mut art = stream(MediaType::Video);
        art.album_art = true;
        map.register_stream(art, false);
        assert!(map.select(MediaType::Video, None, false).is_err());
    }

    #[test]
    fn secondary_subtitles_yield_to_primaries() {
        let mut map = StreamMap::new();
        let file = MediaFile {
            locator: "/subs.srt".into(),
            title: "External".into(),
            streams: vec![stream(MediaType::Subtitle)],
            secondary: true,
        };
        map.register_file(&file);
        map.register_stream(stream(MediaType::Subtitle), false);
        map.calculate_auto_ids();
        assert_eq!(map.collection(MediaType::Subtitle).auto_id(), Some(1));

        let mut map = StreamMap::new();
        map.register_file(&file);
        map.calculate_auto_ids();
        assert_eq!(map.collection(MediaType::Subtitle).auto_id(), Some(0));
    }

    #[test]
    fn file_registration_prefixes_titles() {
        let mut map = StreamMap::new();
        let mut titled = stream(MediaType::Audio);
        titled.title = Some("Commentary".into());
        let file = MediaFile {
            locator: "/movie.mkv".into(),
            title: "Movie".into(),
            streams: vec![titled, stream(MediaType::Video)],
            secondary: false,
        };
        map.register_file(&file);
        assert_eq!(
            map.streams()[0].info.title.as_deref(),
            Some("Movie: Commentary")
        );
        assert_eq!(map.streams()[1].info.title.as_deref(), Some("Movie"));
        assert_eq!(map.files().len(), 1);
        assert_eq!(map.files()[0].stream_ids, vec![0, 1]);
    }
}
