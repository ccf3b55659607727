//! The shared stream registry.
//!
//! One registry owns at most one open hardware stream, no matter how many
//! nodes reference it. Every node holds a [`StreamRef`]; the first connected
//! reference becomes the master and is the only one allowed to extract
//! chunks. Each extracted chunk is published once and stays published until
//! every current reference has consumed it:
//!
//! ```text
//! hardware callback ──push──▶ ring ──extract (master)──▶ published chunk
//!                                                          │ consume (every node, once)
//!                                                          ▼
//!                                          consumed == references ⇒ next extract allowed
//! ```
//!
//! The hardware is opened on the 0→1 reference transition and closed on 1→0.
//! When the master is released while others remain, the lowest surviving
//! instance id is promoted; the accumulation buffer lives here, not in the
//! master, so nothing in flight is lost.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::pipeline::AccumulationBuffer;
use crate::source::{CaptureBackend, CaptureHandle, CpalBackend};
use crate::{EventCallback, MicArrayConfig, MicArrayError, MicArrayEvent, MultiChannelChunk};

/// Identifier of one reference to the shared stream.
///
/// Unique across every registry in the process, so a reference handed to the
/// wrong registry never matches one of its members.
pub type InstanceId = u64;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(0);

/// Whether a reference is backed by an open hardware stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// The hardware stream is open.
    Connected {
        /// Name of the device.
        device: String,
    },
    /// The device could not be opened. Permanent for the reference.
    Disconnected {
        /// Why the device could not be opened.
        reason: String,
    },
}

impl ConnectionStatus {
    /// Returns `true` for [`ConnectionStatus::Connected`].
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// One-line status shown on the node.
    pub fn status_line(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "ReSpeaker v2: Connected",
            Self::Disconnected { .. } => "ReSpeaker v2: Not Found",
        }
    }
}

/// A node's reference to the shared stream, returned by
/// [`SharedStreamRegistry::acquire`] and given back with
/// [`SharedStreamRegistry::release`].
#[must_use]
#[derive(Debug)]
pub struct StreamRef {
    id: InstanceId,
    status: ConnectionStatus,
}

impl StreamRef {
    /// Instance id of this reference.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Connection status, fixed at acquisition.
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Returns `true` if the reference is backed by the hardware stream.
    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }
}

struct OpenStream {
    handle: Box<dyn CaptureHandle>,
    buffer: AccumulationBuffer,
    running: bool,
    device: String,
}

#[derive(Default)]
struct Member {
    consumed_index: Option<u64>,
}

#[derive(Default)]
struct RegistryState {
    stream: Option<OpenStream>,
    members: BTreeMap<InstanceId, Member>,
    master: Option<InstanceId>,
    published: Option<MultiChannelChunk>,
    updated: bool,
    consumed: usize,
    next_index: u64,
}

impl RegistryState {
    fn reset_publication(&mut self) {
        self.published = None;
        self.updated = false;
        self.consumed = 0;
        for member in self.members.values_mut() {
            member.consumed_index = None;
        }
    }

    /// Ends the round once every live reference has the published chunk.
    fn close_round_if_complete(&mut self) {
        if self.updated && self.consumed >= self.members.len() {
            self.updated = false;
        }
    }
}

/// Process-wide owner of the single hardware stream.
///
/// Share it between nodes with an `Arc`. All mutation goes through
/// `acquire`/`release`/`extract`/`consume`, under one short lock that the
/// hardware callback never takes.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use mic_array_stream::{MicArrayConfig, MockBackend, SharedStreamRegistry};
///
/// let backend = MockBackend::new();
/// let registry = Arc::new(
///     SharedStreamRegistry::new(backend.clone(), MicArrayConfig::default()).unwrap(),
/// );
///
/// let a = registry.acquire();
/// let b = registry.acquire();
/// assert!(registry.is_master(&a));
/// assert_eq!(backend.open_count(), 1);
///
/// registry.release(a);
/// assert!(registry.is_master(&b));
/// registry.release(b);
/// assert_eq!(backend.close_count(), 1);
/// ```
pub struct SharedStreamRegistry {
    backend: Arc<dyn CaptureBackend>,
    config: MicArrayConfig,
    state: Mutex<RegistryState>,
    event_callback: Option<EventCallback>,
}

impl SharedStreamRegistry {
    /// Creates a registry that opens the device through `backend`.
    ///
    /// Nothing is opened until the first [`acquire`](Self::acquire).
    pub fn new(
        backend: impl CaptureBackend + 'static,
        config: MicArrayConfig,
    ) -> Result<Self, MicArrayError> {
        config.validate()?;
        Ok(Self {
            backend: Arc::new(backend),
            config,
            state: Mutex::new(RegistryState::default()),
            event_callback: None,
        })
    }

    /// Creates a registry backed by the real device through CPAL.
    pub fn cpal(config: MicArrayConfig) -> Result<Self, MicArrayError> {
        Self::new(CpalBackend::new(), config)
    }

    /// Sets a callback to receive runtime events.
    #[must_use]
    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    /// The configuration the stream is opened with.
    pub fn config(&self) -> &MicArrayConfig {
        &self.config
    }

    fn emit_all(&self, events: Vec<MicArrayEvent>) {
        if let Some(ref callback) = self.event_callback {
            for event in events {
                callback(event);
            }
        }
    }

    /// Adds a reference, opening the hardware if this is the first one.
    ///
    /// The first connected reference becomes master. If the device cannot be
    /// opened the reference is returned disconnected and is not counted; it
    /// never becomes connected later.
    pub fn acquire(&self) -> StreamRef {
        let id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        let mut events = Vec::new();

        let status = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            if state.stream.is_none() {
                match self.backend.open(&self.config.capture_config()) {
                    Ok(opened) => {
                        tracing::info!(device = %opened.device_name, "mic array stream opened");
                        events.push(MicArrayEvent::StreamOpened {
                            device: opened.device_name.clone(),
                        });
                        state.stream = Some(OpenStream {
                            handle: opened.handle,
                            buffer: AccumulationBuffer::new(
                                opened.frames,
                                opened.overruns,
                                self.config.chunk_size,
                            ),
                            running: true,
                            device: opened.device_name,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, instance = id, "mic array unavailable");
                        events.push(MicArrayEvent::DeviceUnavailable {
                            reason: e.to_string(),
                        });
                    }
                }
            }

            match &state.stream {
                Some(stream) => {
                    state.members.insert(id, Member::default());
                    if state.master.is_none() {
                        state.master = Some(id);
                        tracing::debug!(instance = id, "instance is master");
                    }
                    ConnectionStatus::Connected {
                        device: stream.device.clone(),
                    }
                }
                None => ConnectionStatus::Disconnected {
                    reason: events
                        .iter()
                        .find_map(|e| match e {
                            MicArrayEvent::DeviceUnavailable { reason } => Some(reason.clone()),
                            _ => None,
                        })
                        .unwrap_or_default(),
                },
            }
        };

        self.emit_all(events);
        StreamRef { id, status }
    }

    /// Gives a reference back.
    ///
    /// Releasing the last reference closes the hardware and clears all
    /// accumulated and published data. Releasing the master while others
    /// remain promotes the lowest surviving instance id.
    pub fn release(&self, stream_ref: StreamRef) {
        if !stream_ref.is_connected() {
            return;
        }
        let id = stream_ref.id;
        let mut events = Vec::new();

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            match state.members.remove(&id) {
                None => {
                    tracing::error!(instance = id, "release of an instance that holds no reference");
                    events.push(MicArrayEvent::ReleaseMismatch { instance: id });
                }
                Some(member) => {
                    let had_current = state.updated
                        && state
                            .published
                            .as_ref()
                            .is_some_and(|p| member.consumed_index == Some(p.index));
                    if had_current {
                        state.consumed = state.consumed.saturating_sub(1);
                    }

                    if state.members.is_empty() {
                        state.master = None;
                        if let Some(stream) = state.stream.take() {
                            // Dropping the handle stops and closes the device
                            drop(stream);
                            tracing::info!("mic array stream closed");
                            events.push(MicArrayEvent::StreamClosed);
                        }
                        state.reset_publication();
                        state.next_index = 0;
                    } else {
                        if state.master == Some(id) {
                            let next = state.members.keys().next().copied();
                            state.master = next;
                            if let Some(current) = next {
                                tracing::info!(previous = id, current, "master promoted");
                                events.push(MicArrayEvent::MasterPromoted {
                                    previous: id,
                                    current,
                                });
                            }
                        }
                        state.close_round_if_complete();
                    }
                }
            }
        }

        self.emit_all(events);
    }

    /// Returns `true` if `stream_ref` is the current master.
    pub fn is_master(&self, stream_ref: &StreamRef) -> bool {
        stream_ref.is_connected() && self.state.lock().master == Some(stream_ref.id)
    }

    /// Restarts a stream paused by [`halt`](Self::halt). Master only; a no-op
    /// when the stream is already running.
    pub fn resume(&self, stream_ref: &StreamRef) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.master != Some(stream_ref.id) || !stream_ref.is_connected() {
            return;
        }
        let Some(stream) = state.stream.as_mut() else {
            return;
        };
        if stream.running {
            return;
        }
        match stream.handle.play() {
            Ok(()) => {
                stream.running = true;
                tracing::info!(device = %stream.device, "capture resumed");
            }
            Err(e) => tracing::warn!(error = %e, "failed to resume capture"),
        }
    }

    /// Pauses the hardware and discards everything accumulated or published,
    /// keeping the device open. Master only.
    pub fn halt(&self, stream_ref: &StreamRef) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.master != Some(stream_ref.id) || !stream_ref.is_connected() {
            return;
        }
        let Some(stream) = state.stream.as_mut() else {
            return;
        };
        if stream.running {
            if let Err(e) = stream.handle.pause() {
                tracing::warn!(error = %e, "failed to pause capture");
            }
            stream.running = false;
        }
        let dropped = stream.buffer.clear();
        tracing::debug!(dropped_frames = dropped, "capture halted");
        state.reset_publication();
    }

    /// Publishes the next chunk if the caller is master, the previous chunk
    /// has been consumed by everyone, and a full chunk has accumulated.
    ///
    /// Returns the index of the published chunk. Too few frames is a normal
    /// no-op, not an error.
    pub fn extract(&self, stream_ref: &StreamRef) -> Option<u64> {
        let mut events = Vec::new();

        let published = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.master != Some(stream_ref.id) || !stream_ref.is_connected() {
                return None;
            }
            let stream = state.stream.as_mut()?;

            let dropped_samples = stream.buffer.take_overruns();
            if dropped_samples > 0 {
                tracing::warn!(dropped_samples, "input overrun");
                events.push(MicArrayEvent::InputOverrun { dropped_samples });
            }

            if state.updated {
                None
            } else if let Some(chunk) = stream.buffer.try_extract(state.next_index) {
                let index = chunk.index;
                tracing::debug!(index, "chunk published");
                state.next_index += 1;
                state.published = Some(chunk);
                state.updated = true;
                state.consumed = 0;
                Some(index)
            } else {
                None
            }
        };

        self.emit_all(events);
        published
    }

    /// Hands the published chunk to `stream_ref` if it has not consumed it yet.
    pub fn consume(&self, stream_ref: &StreamRef) -> Option<MultiChannelChunk> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.updated {
            return None;
        }
        let published = state.published.as_ref()?;
        let member = state.members.get_mut(&stream_ref.id)?;
        if member.consumed_index == Some(published.index) {
            return None;
        }
        member.consumed_index = Some(published.index);
        let chunk = published.clone();

        state.consumed += 1;
        state.close_round_if_complete();
        Some(chunk)
    }

    /// Number of live (connected) references.
    pub fn reference_count(&self) -> usize {
        self.state.lock().members.len()
    }

    /// Returns `true` while the hardware stream is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().stream.is_some()
    }

    /// Returns `true` while the hardware stream is open and not halted.
    pub fn is_running(&self) -> bool {
        self.state.lock().stream.as_ref().is_some_and(|s| s.running)
    }

    /// Instance id of the current master.
    pub fn master(&self) -> Option<InstanceId> {
        self.state.lock().master
    }

    /// Index of the currently published chunk, if any.
    pub fn published_index(&self) -> Option<u64> {
        self.state.lock().published.as_ref().map(|p| p.index)
    }

    /// Returns `true` while the published chunk still has consumers pending.
    pub fn is_updated(&self) -> bool {
        self.state.lock().updated
    }

    /// Frames waiting in the accumulation buffer.
    pub fn pending_frames(&self) -> usize {
        self.state
            .lock()
            .stream
            .as_ref()
            .map_or(0, |s| s.buffer.available_frames())
    }
}
