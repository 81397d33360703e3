use serde_json::Value;
use std::future::Future;

/// Why the engine reached the end of the loaded source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// Natural end of file.
    Eof,
    /// Playback was stopped, usually by a newer load replacing this one.
    Stop,
    /// The source could not be played.
    Error,
}

/// Events the playback engine reports back. These are the only triggers
/// for session state transitions.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    Seek,
    PlaybackRestart,
    EndOfFile(EndReason),
    PropertyChange { name: String, value: Value },
    Log { level: String, text: String },
}

/// Control surface of the external playback engine. The compiler and the
/// filter assembler only produce data; all engine calls go through the
/// session controller via this trait.
pub trait Engine: Send + Sync + 'static {
    /// Replace the current source. Completion means the command was
    /// accepted, not that the source started playing.
    fn load(&self, locator: &str) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn set_property(&self, name: &str, value: Value)
    -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Subscribe to property-change events for `name`.
    fn observe(&self, name: &str) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn seek(&self, time: f64) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn command(&self, name: &str, args: &[Value])
    -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Ordered event stream. Closes when the engine process dies.
    fn events(&self) -> async_channel::Receiver<EngineEvent>;
}

impl<T: Engine> Engine for std::sync::Arc<T> {
    fn load(&self, locator: &str) -> impl Future<Output = anyhow::Result<()>> + Send {
        (**self).load(locator)
    }

    fn set_property(
        &self,
        name: &str,
        value: Value,
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        (**self).set_property(name, value)
    }

    fn observe(&self, name: &str) -> impl Future<Output = anyhow::Result<()>> + Send {
        (**self).observe(name)
    }

    fn seek(&self, time: f64) -> impl Future<Output = anyhow::Result<()>> + Send {
        (**self).seek(time)
    }

    fn command(&self, name: &str, args: &[Value]) -> impl Future<Output = anyhow::Result<()>> + Send {
        (**self).command(name, args)
    }

    fn events(&self) -> async_channel::Receiver<EngineEvent> {
        (**self).events()
    }
}
