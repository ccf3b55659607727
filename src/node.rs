//! A canvas node reading one channel of the shared stream.

use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::registry::{ConnectionStatus, SharedStreamRegistry, StreamRef};
use crate::{Channel, ChannelOutput, DisplayBuffer, MicArrayError, MultiChannelChunk};

/// Version tag written into persisted node settings.
pub const NODE_VERSION: &str = "0.0.1";

/// Label of the mic node in the node menu.
pub const NODE_LABEL: &str = "ReSpeaker v2 Mic";

/// Host tag of the mic node.
pub const NODE_TAG: &str = "ReSpeakerV2Mic";

/// Playback intent broadcast by the host to every node once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// No transport state reported yet.
    #[default]
    Idle,
    /// Capture and deliver chunks.
    Playing,
    /// Hold the last output.
    Paused,
    /// Reset local state.
    Stopped,
}

impl FromStr for Transport {
    type Err = Infallible;

    /// Parses the host's `current_status` string. Unknown values are `Idle`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "play" => Self::Playing,
            "pause" => Self::Paused,
            "stop" => Self::Stopped,
            _ => Self::Idle,
        })
    }
}

/// The per-node layout the host persists. No audio state is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSetting {
    /// Node version, [`NODE_VERSION`] when written by this crate.
    pub ver: String,
    /// Canvas position.
    pub pos: [i32; 2],
}

impl NodeSetting {
    /// A setting at `pos` with the current version tag.
    pub fn new(pos: [i32; 2]) -> Self {
        Self {
            ver: NODE_VERSION.to_string(),
            pos,
        }
    }
}

/// Formats a tick duration the way the node displays it: whole
/// milliseconds, zero-padded to four digits.
///
/// ```
/// use std::time::Duration;
/// use mic_array_stream::format_elapsed;
///
/// assert_eq!(format_elapsed(Duration::from_micros(3_700)), "0003ms");
/// assert_eq!(format_elapsed(Duration::from_millis(12_345)), "12345ms");
/// ```
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:04}ms", elapsed.as_millis())
}

/// One instance of the mic node.
///
/// Each node holds a reference to the shared stream and its own channel
/// selection, last chunk and display window. Ticking a node never blocks on
/// the hardware; when nothing new has been published the node repeats the
/// last chunk it delivered.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use mic_array_stream::{
///     Channel, MicArrayConfig, MicArrayNode, MockBackend, MockSource,
///     SharedStreamRegistry, Transport,
/// };
///
/// let backend = MockBackend::new();
/// let config = MicArrayConfig { chunk_size: 256, ..Default::default() };
/// let registry = Arc::new(SharedStreamRegistry::new(backend.clone(), config).unwrap());
///
/// let mut node = MicArrayNode::new(Arc::clone(&registry));
/// node.select_channel(Channel::Mic1);
///
/// let mut source = MockSource::new(16000);
/// source.generate_sine(440.0, 256);
/// backend.push_frames(source.samples());
///
/// let output = node.tick(Transport::Playing);
/// assert_eq!(output.chunk_index, Some(0));
/// assert_eq!(output.samples.len(), 256);
/// ```
pub struct MicArrayNode {
    registry: Arc<SharedStreamRegistry>,
    stream: Option<StreamRef>,
    status: ConnectionStatus,
    channel: Channel,
    last_chunk: Option<MultiChannelChunk>,
    display: DisplayBuffer,
    stopped: bool,
    use_perf_counter: bool,
    last_elapsed: Option<Duration>,
    position: [i32; 2],
}

impl MicArrayNode {
    /// Creates a node and acquires a reference to the shared stream.
    ///
    /// A missing device doesn't fail: the node is created disconnected and
    /// outputs nothing for its lifetime.
    pub fn new(registry: Arc<SharedStreamRegistry>) -> Self {
        let stream = registry.acquire();
        let status = stream.status().clone();
        let config = registry.config();
        let display = DisplayBuffer::new(config.display_len(), config.sample_rate);
        let use_perf_counter = config.use_perf_counter;

        Self {
            registry,
            stream: Some(stream),
            status,
            channel: Channel::default(),
            last_chunk: None,
            display,
            stopped: false,
            use_perf_counter,
            last_elapsed: None,
            position: [0, 0],
        }
    }

    /// Creates a node and restores its persisted layout.
    pub fn with_setting(registry: Arc<SharedStreamRegistry>, setting: &NodeSetting) -> Self {
        let mut node = Self::new(registry);
        node.apply_setting(setting);
        node
    }

    /// Runs one scheduler tick and returns this node's output.
    pub fn tick(&mut self, transport: Transport) -> ChannelOutput {
        let started = self.use_perf_counter.then(Instant::now);

        match transport {
            Transport::Playing => self.play(),
            Transport::Stopped => self.stop(),
            Transport::Paused | Transport::Idle => {}
        }

        if let Some(started) = started {
            self.last_elapsed = Some(started.elapsed());
        }
        self.output()
    }

    fn play(&mut self) {
        self.stopped = false;
        let Some(stream) = self.stream.as_ref().filter(|s| s.is_connected()) else {
            return;
        };

        // Both are no-ops unless this node is master
        self.registry.resume(stream);
        self.registry.extract(stream);

        if let Some(chunk) = self.registry.consume(stream) {
            self.display.push(&chunk.channel(self.channel));
            self.last_chunk = Some(chunk);
        }
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let Some(stream) = self.stream.as_ref() {
            self.registry.halt(stream);
        }
        self.last_chunk = None;
        self.display.reset();
        tracing::debug!(instance = ?self.instance_id(), "node stopped");
    }

    /// The node's current output without advancing anything.
    pub fn output(&self) -> ChannelOutput {
        match self.last_chunk {
            Some(ref chunk) => ChannelOutput {
                chunk_index: Some(chunk.index),
                samples: chunk.channel(self.channel),
            },
            None => ChannelOutput::empty(),
        }
    }

    /// Selects the channel this node outputs. Other nodes are unaffected.
    pub fn select_channel(&mut self, channel: Channel) {
        self.channel = channel;
    }

    /// Selects a channel by hardware index (0-5).
    pub fn select_channel_index(&mut self, index: usize) -> Result<(), MicArrayError> {
        self.channel = Channel::from_index(index)?;
        Ok(())
    }

    /// Selects a channel by its selector label.
    pub fn select_channel_label(&mut self, label: &str) -> Result<(), MicArrayError> {
        self.channel = label.parse()?;
        Ok(())
    }

    /// The selected channel.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Connection status, fixed when the node was created.
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Rolling window of the selected channel.
    pub fn display(&self) -> &DisplayBuffer {
        &self.display
    }

    /// Returns `true` if this node currently extracts for everyone.
    pub fn is_master(&self) -> bool {
        self.stream
            .as_ref()
            .is_some_and(|s| self.registry.is_master(s))
    }

    /// Index of the last chunk this node received; `None` until the first one
    /// and after a stop.
    pub fn chunk_index(&self) -> Option<u64> {
        self.last_chunk.as_ref().map(|c| c.index)
    }

    /// Instance id of the node's stream reference, `None` once closed.
    pub fn instance_id(&self) -> Option<u64> {
        self.stream.as_ref().map(StreamRef::id)
    }

    /// Duration of the last tick when tick timing is enabled.
    pub fn last_elapsed(&self) -> Option<Duration> {
        self.last_elapsed
    }

    /// Canvas position.
    pub fn position(&self) -> [i32; 2] {
        self.position
    }

    /// Moves the node on the canvas.
    pub fn set_position(&mut self, position: [i32; 2]) {
        self.position = position;
    }

    /// The layout to persist for this node.
    pub fn setting(&self) -> NodeSetting {
        NodeSetting::new(self.position)
    }

    /// Restores a persisted layout. Only the position is restored.
    pub fn apply_setting(&mut self, setting: &NodeSetting) {
        self.position = setting.pos;
    }

    /// Releases the node's stream reference. Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.registry.release(stream);
        }
        self.last_chunk = None;
    }
}

impl Drop for MicArrayNode {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MicArrayConfig, MockBackend, MockSource};

    const CHUNK: usize = 32;

    fn setup() -> (MockBackend, Arc<SharedStreamRegistry>) {
        let backend = MockBackend::new();
        let config = MicArrayConfig {
            chunk_size: CHUNK,
            display_duration: Duration::from_millis(10), // 160 samples
            ..Default::default()
        };
        let registry = Arc::new(SharedStreamRegistry::new(backend.clone(), config).unwrap());
        (backend, registry)
    }

    fn feed(backend: &MockBackend, source: &mut MockSource, frames: usize) {
        source.generate_channel_ramps(frames);
        backend.push_frames(&source.take_samples());
    }

    #[test]
    fn test_transport_parse() {
        assert_eq!("play".parse::<Transport>().unwrap(), Transport::Playing);
        assert_eq!("pause".parse::<Transport>().unwrap(), Transport::Paused);
        assert_eq!("stop".parse::<Transport>().unwrap(), Transport::Stopped);
        assert_eq!("".parse::<Transport>().unwrap(), Transport::Idle);
        assert_eq!("PLAY".parse::<Transport>().unwrap(), Transport::Idle);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::ZERO), "0000ms");
        assert_eq!(format_elapsed(Duration::from_millis(42)), "0042ms");
    }

    #[test]
    fn test_setting_serde() {
        let setting = NodeSetting::new([120, -40]);
        let json = serde_json::to_string(&setting).unwrap();
        assert_eq!(json, r#"{"ver":"0.0.1","pos":[120,-40]}"#);
        let parsed: NodeSetting = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, setting);
    }

    #[test]
    fn test_apply_setting_restores_position_only() {
        let (_backend, registry) = setup();
        let mut node = MicArrayNode::new(registry);
        node.select_channel(Channel::Mic4);
        node.apply_setting(&NodeSetting {
            ver: "0.0.0".to_string(),
            pos: [10, 20],
        });
        assert_eq!(node.position(), [10, 20]);
        assert_eq!(node.channel(), Channel::Mic4);
        assert_eq!(node.setting().ver, NODE_VERSION);
    }

    #[test]
    fn test_output_empty_before_first_chunk() {
        let (backend, registry) = setup();
        let mut node = MicArrayNode::new(registry);
        let mut source = MockSource::new(16000);
        feed(&backend, &mut source, CHUNK - 1);

        let output = node.tick(Transport::Playing);
        assert!(output.is_empty());
        assert_eq!(output.chunk_index, None);
        assert_eq!(output.host_chunk_index(), -1);
    }

    #[test]
    fn test_repeats_last_chunk_without_new_data() {
        let (backend, registry) = setup();
        let mut node = MicArrayNode::new(registry);
        let mut source = MockSource::new(16000);
        feed(&backend, &mut source, CHUNK);

        let first = node.tick(Transport::Playing);
        let second = node.tick(Transport::Playing);
        assert_eq!(first.chunk_index, Some(0));
        assert_eq!(second.chunk_index, Some(0));
        assert_eq!(first.samples, second.samples);
    }

    #[test]
    fn test_selected_channel_is_output() {
        let (backend, registry) = setup();
        let mut node = MicArrayNode::new(registry);
        node.select_channel_index(3).unwrap();
        let mut source = MockSource::new(16000);
        feed(&backend, &mut source, CHUNK);

        let output = node.tick(Transport::Playing);
        assert_eq!(output.samples[0], crate::source::ramp_value(3, 0));

        node.select_channel_label("Playback Reference").unwrap();
        assert_eq!(node.output().samples[0], crate::source::ramp_value(5, 0));
        assert!(node.select_channel_index(6).is_err());
        assert_eq!(node.channel(), Channel::PlaybackReference);
    }

    #[test]
    fn test_display_updates_with_chunks() {
        let (backend, registry) = setup();
        let mut node = MicArrayNode::new(registry);
        let mut source = MockSource::new(16000);
        feed(&backend, &mut source, CHUNK);

        node.tick(Transport::Playing);
        let display = node.display().samples();
        assert_eq!(display.len(), 160);
        assert_eq!(display[160 - CHUNK], crate::source::ramp_value(0, 0));
        assert_eq!(display[0], 0.0);
    }

    #[test]
    fn test_pause_holds_output() {
        let (backend, registry) = setup();
        let mut node = MicArrayNode::new(registry);
        let mut source = MockSource::new(16000);
        feed(&backend, &mut source, CHUNK * 2);

        node.tick(Transport::Playing);
        let paused = node.tick(Transport::Paused);
        assert_eq!(paused.chunk_index, Some(0));
        assert_eq!(node.tick(Transport::Playing).chunk_index, Some(1));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (backend, registry) = setup();
        let mut node = MicArrayNode::new(Arc::clone(&registry));
        let mut source = MockSource::new(16000);
        feed(&backend, &mut source, CHUNK);
        node.tick(Transport::Playing);

        let once = node.tick(Transport::Stopped);
        let display_once = node.display().clone();
        let twice = node.tick(Transport::Stopped);

        assert!(once.is_empty() && twice.is_empty());
        assert_eq!(once.chunk_index, twice.chunk_index);
        assert_eq!(&display_once, node.display());
        assert!(node.display().samples().iter().all(|&s| s == 0.0));
        // Stopping keeps the device open, only paused
        assert!(registry.is_open());
        assert!(!backend.is_running());
        assert_eq!(backend.close_count(), 0);
    }

    #[test]
    fn test_play_after_stop_resumes() {
        let (backend, registry) = setup();
        let mut node = MicArrayNode::new(registry);
        let mut source = MockSource::new(16000);

        node.tick(Transport::Stopped);
        assert!(!backend.is_running());

        node.tick(Transport::Playing);
        assert!(backend.is_running());
        feed(&backend, &mut source, CHUNK);
        assert!(node.tick(Transport::Playing).chunk_index.is_some());
    }

    #[test]
    fn test_perf_counter() {
        let backend = MockBackend::new();
        let config = MicArrayConfig {
            use_perf_counter: true,
            ..Default::default()
        };
        let registry = Arc::new(SharedStreamRegistry::new(backend, config).unwrap());
        let mut node = MicArrayNode::new(registry);
        assert!(node.last_elapsed().is_none());
        node.tick(Transport::Playing);
        assert!(node.last_elapsed().is_some());
    }

    #[test]
    fn test_close_releases_once() {
        let (backend, registry) = setup();
        let mut node = MicArrayNode::new(Arc::clone(&registry));
        node.close();
        node.close();
        assert_eq!(backend.close_count(), 1);
        assert!(node.instance_id().is_none());
        drop(node);
        assert_eq!(backend.close_count(), 1);
        assert_eq!(registry.reference_count(), 0);
    }

    #[test]
    fn test_disconnected_node() {
        let backend = MockBackend::missing();
        let registry = Arc::new(
            SharedStreamRegistry::new(backend.clone(), MicArrayConfig::default()).unwrap(),
        );
        let mut node = MicArrayNode::new(registry);
        assert_eq!(node.status().status_line(), "ReSpeaker v2: Not Found");
        assert!(!node.is_master());

        backend.set_missing(false);
        assert!(node.tick(Transport::Playing).is_empty());
        assert!(!node.status().is_connected());
        assert_eq!(backend.open_count(), 0);
    }
}
