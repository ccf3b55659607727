//! Voice-activity readout from the array's vendor control endpoint.
//!
//! The array's DSP exposes its tuning parameters over USB control transfers.
//! [`VoiceActivityNode`] polls the `VOICEACTIVITY` parameter at most every
//! 100 ms while playing and republishes the last value in between. Read
//! failures are swallowed and the previous value is kept.
//!
//! Only one voice-activity node may exist at a time; [`VoiceActivitySlot`]
//! hands out the single claim.

#[cfg(feature = "usb")]
mod usb;

#[cfg(feature = "usb")]
pub use usb::UsbTuning;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::node::{NodeSetting, Transport};
use crate::registry::ConnectionStatus;
use crate::{ControlError, MicArrayConfig, MicArrayError};

/// Minimum time between two reads of the control endpoint.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Label of the voice-activity node.
pub const VAD_NODE_LABEL: &str = "ReSpeaker v2 VAD";

/// Bytes in a parameter response: two little-endian `i32`s.
const RESPONSE_LEN: usize = 8;

/// How a parameter's value is encoded in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// First word is the value.
    Int,
    /// `mantissa * 2^exponent` from the two words.
    Float,
}

/// Whether a parameter can be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read-only.
    ReadOnly,
    /// Readable and writable.
    ReadWrite,
}

/// A DSP tuning parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningParameter {
    /// Parameter name in the vendor tooling.
    pub name: &'static str,
    /// Parameter block id, sent as the transfer index.
    pub id: u16,
    /// Offset within the block.
    pub offset: u16,
    /// Value encoding.
    pub kind: ParameterKind,
    /// Largest valid value.
    pub max: f64,
    /// Smallest valid value.
    pub min: f64,
    /// Read/write access.
    pub access: Access,
    /// Human-readable description.
    pub description: &'static str,
}

/// VAD voice activity status: 0 = no voice activity, 1 = voice activity.
pub const VOICE_ACTIVITY: TuningParameter = TuningParameter {
    name: "VOICEACTIVITY",
    id: 19,
    offset: 32,
    kind: ParameterKind::Int,
    max: 1.0,
    min: 0.0,
    access: Access::ReadOnly,
    description: "VAD voice activity status.",
};

/// A decoded parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TuningValue {
    /// An integer parameter.
    Int(i32),
    /// A float parameter.
    Float(f64),
}

impl TuningValue {
    /// Returns `true` for a non-zero value.
    pub fn is_set(self) -> bool {
        match self {
            Self::Int(v) => v != 0,
            Self::Float(v) => v != 0.0,
        }
    }
}

impl TuningParameter {
    /// The `wValue` of the read request: read bit, offset, and the int flag.
    pub fn command(&self) -> u16 {
        let command = 0x80 | self.offset;
        match self.kind {
            ParameterKind::Int => command | 0x40,
            ParameterKind::Float => command,
        }
    }

    /// Decodes a read response.
    pub fn decode(&self, response: &[u8]) -> Result<TuningValue, ControlError> {
        if response.len() < RESPONSE_LEN {
            return Err(ControlError::ShortResponse {
                len: response.len(),
            });
        }
        let word = |i: usize| {
            i32::from_le_bytes([
                response[i],
                response[i + 1],
                response[i + 2],
                response[i + 3],
            ])
        };
        let (value, exponent) = (word(0), word(4));

        Ok(match self.kind {
            ParameterKind::Int => TuningValue::Int(value),
            ParameterKind::Float => TuningValue::Float(f64::from(value) * 2f64.powi(exponent)),
        })
    }
}

/// A device that answers vendor control reads.
pub trait ControlEndpoint: Send {
    /// Issues one vendor IN control transfer and returns the bytes read.
    fn read_raw(&mut self, command: u16, id: u16, buf: &mut [u8]) -> Result<usize, ControlError>;

    /// Reads and decodes a tuning parameter.
    fn read(&mut self, parameter: &TuningParameter) -> Result<TuningValue, ControlError> {
        let mut buf = [0u8; RESPONSE_LEN];
        let len = self.read_raw(parameter.command(), parameter.id, &mut buf)?;
        parameter.decode(&buf[..len.min(RESPONSE_LEN)])
    }

    /// Reads the voice-activity flag.
    fn read_voice_activity(&mut self) -> Result<bool, ControlError> {
        self.read(&VOICE_ACTIVITY).map(TuningValue::is_set)
    }
}

/// Output of the voice-activity node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoiceActivity(pub bool);

impl VoiceActivity {
    /// The host's encoding: 1 for voice, 0 otherwise.
    pub fn as_int(self) -> i32 {
        i32::from(self.0)
    }
}

/// Grants at most one live voice-activity node.
///
/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct VoiceActivitySlot {
    taken: Arc<AtomicBool>,
}

impl VoiceActivitySlot {
    /// Creates a free slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a node holds the slot.
    pub fn is_taken(&self) -> bool {
        self.taken.load(Ordering::SeqCst)
    }

    /// Creates the voice-activity node, or refuses if one already exists.
    ///
    /// `endpoint` is `None` when no control device was found; the node then
    /// reports "Not Found" and always outputs 0.
    pub fn claim(
        &self,
        endpoint: Option<Box<dyn ControlEndpoint>>,
        config: &MicArrayConfig,
    ) -> Result<VoiceActivityNode, MicArrayError> {
        if self.taken.swap(true, Ordering::SeqCst) {
            tracing::warn!("voice-activity node already exists");
            return Err(MicArrayError::InstanceLimit {
                node: VAD_NODE_LABEL,
            });
        }

        let status = match endpoint {
            Some(_) => ConnectionStatus::Connected {
                device: "ReSpeaker USB control".to_string(),
            },
            None => ConnectionStatus::Disconnected {
                reason: ControlError::NotConnected.to_string(),
            },
        };

        Ok(VoiceActivityNode {
            _claim: SlotClaim {
                taken: Arc::clone(&self.taken),
            },
            endpoint,
            status,
            value: VoiceActivity::default(),
            last_poll: None,
            use_perf_counter: config.use_perf_counter,
            last_elapsed: None,
            position: [0, 0],
        })
    }
}

struct SlotClaim {
    taken: Arc<AtomicBool>,
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        self.taken.store(false, Ordering::SeqCst);
    }
}

/// The single voice-activity node. Dropping it frees the slot.
pub struct VoiceActivityNode {
    _claim: SlotClaim,
    endpoint: Option<Box<dyn ControlEndpoint>>,
    status: ConnectionStatus,
    value: VoiceActivity,
    last_poll: Option<Instant>,
    use_perf_counter: bool,
    last_elapsed: Option<Duration>,
    position: [i32; 2],
}

impl VoiceActivityNode {
    /// Runs one scheduler tick.
    pub fn tick(&mut self, transport: Transport) -> VoiceActivity {
        self.tick_at(transport, Instant::now())
    }

    /// Runs one tick as if the current time were `now`.
    pub fn tick_at(&mut self, transport: Transport, now: Instant) -> VoiceActivity {
        let started = self.use_perf_counter.then(Instant::now);

        if transport == Transport::Playing && self.poll_due(now) {
            self.last_poll = Some(now);
            if let Some(endpoint) = self.endpoint.as_mut() {
                match endpoint.read_voice_activity() {
                    Ok(active) => self.value = VoiceActivity(active),
                    Err(e) => tracing::debug!(error = %e, "voice activity read failed"),
                }
            }
        }

        if let Some(started) = started {
            self.last_elapsed = Some(started.elapsed());
        }
        self.value
    }

    fn poll_due(&self, now: Instant) -> bool {
        self.last_poll
            .map_or(true, |last| now.saturating_duration_since(last) >= POLL_INTERVAL)
    }

    /// The last value read.
    pub fn value(&self) -> VoiceActivity {
        self.value
    }

    /// Whether a control endpoint was found.
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Duration of the last tick when tick timing is enabled.
    pub fn last_elapsed(&self) -> Option<Duration> {
        self.last_elapsed
    }

    /// The layout to persist for this node.
    pub fn setting(&self) -> NodeSetting {
        NodeSetting::new(self.position)
    }

    /// Restores a persisted layout. Only the position is restored.
    pub fn apply_setting(&mut self, setting: &NodeSetting) {
        self.position = setting.pos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Endpoint answering from a script of responses.
    struct ScriptedEndpoint {
        responses: Arc<Mutex<Vec<Result<[u8; 8], ()>>>>,
        requests: Arc<Mutex<Vec<(u16, u16)>>>,
    }

    impl ControlEndpoint for ScriptedEndpoint {
        fn read_raw(
            &mut self,
            command: u16,
            id: u16,
            buf: &mut [u8],
        ) -> Result<usize, ControlError> {
            self.requests.lock().push((command, id));
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err(ControlError::Transfer("no response scripted".to_string()));
            }
            match responses.remove(0) {
                Ok(bytes) => {
                    buf[..8].copy_from_slice(&bytes);
                    Ok(8)
                }
                Err(()) => Err(ControlError::Transfer("pipe error".to_string())),
            }
        }
    }

    fn int_response(value: i32) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&value.to_le_bytes());
        bytes
    }

    type Requests = Arc<Mutex<Vec<(u16, u16)>>>;

    fn endpoint(script: Vec<Result<[u8; 8], ()>>) -> (Box<dyn ControlEndpoint>, Requests) {
        let responses = Arc::new(Mutex::new(script));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let endpoint = ScriptedEndpoint {
            responses,
            requests: Arc::clone(&requests),
        };
        (Box::new(endpoint), requests)
    }

    #[test]
    fn test_voice_activity_command() {
        assert_eq!(VOICE_ACTIVITY.command(), 0x80 | 32 | 0x40);
        assert_eq!(VOICE_ACTIVITY.id, 19);
    }

    #[test]
    fn test_decode_int_and_float() {
        assert_eq!(
            VOICE_ACTIVITY.decode(&int_response(1)).unwrap(),
            TuningValue::Int(1)
        );

        let float = TuningParameter {
            kind: ParameterKind::Float,
            ..VOICE_ACTIVITY
        };
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&3i32.to_le_bytes());
        bytes[4..].copy_from_slice(&(-1i32).to_le_bytes());
        assert_eq!(float.decode(&bytes).unwrap(), TuningValue::Float(1.5));
        assert_eq!(float.command(), 0x80 | 32);
    }

    #[test]
    fn test_decode_short_response() {
        assert!(matches!(
            VOICE_ACTIVITY.decode(&[1, 0, 0]),
            Err(ControlError::ShortResponse { len: 3 })
        ));
    }

    #[test]
    fn test_slot_is_single_instance() {
        let slot = VoiceActivitySlot::new();
        let config = MicArrayConfig::default();

        let node = slot.claim(None, &config).unwrap();
        assert!(slot.is_taken());
        assert!(matches!(
            slot.clone().claim(None, &config),
            Err(MicArrayError::InstanceLimit { .. })
        ));

        drop(node);
        assert!(!slot.is_taken());
        assert!(slot.claim(None, &config).is_ok());
    }

    #[test]
    fn test_polls_at_most_every_interval() {
        let (endpoint, requests) =
            endpoint(vec![Ok(int_response(1)), Ok(int_response(0)), Ok(int_response(1))]);
        let slot = VoiceActivitySlot::new();
        let mut node = slot
            .claim(Some(endpoint), &MicArrayConfig::default())
            .unwrap();
        let start = Instant::now();

        assert_eq!(node.tick_at(Transport::Playing, start), VoiceActivity(true));
        let early = start + Duration::from_millis(50);
        assert_eq!(node.tick_at(Transport::Playing, early), VoiceActivity(true));
        assert_eq!(requests.lock().len(), 1);

        let later = start + POLL_INTERVAL;
        assert_eq!(node.tick_at(Transport::Playing, later), VoiceActivity(false));
        assert_eq!(requests.lock().len(), 2);
        assert_eq!(requests.lock()[0], (VOICE_ACTIVITY.command(), 19));
    }

    #[test]
    fn test_read_failure_keeps_last_value() {
        let (endpoint, _) = endpoint(vec![Ok(int_response(1)), Err(())]);
        let slot = VoiceActivitySlot::new();
        let mut node = slot
            .claim(Some(endpoint), &MicArrayConfig::default())
            .unwrap();
        let start = Instant::now();

        node.tick_at(Transport::Playing, start);
        let value = node.tick_at(Transport::Playing, start + POLL_INTERVAL);
        assert_eq!(value, VoiceActivity(true));
        assert_eq!(value.as_int(), 1);
    }

    #[test]
    fn test_no_poll_unless_playing() {
        let (endpoint, requests) = endpoint(vec![Ok(int_response(1))]);
        let slot = VoiceActivitySlot::new();
        let mut node = slot
            .claim(Some(endpoint), &MicArrayConfig::default())
            .unwrap();

        let now = Instant::now();
        node.tick_at(Transport::Paused, now);
        node.tick_at(Transport::Stopped, now);
        assert_eq!(node.tick_at(Transport::Idle, now).as_int(), 0);
        assert!(requests.lock().is_empty());
    }

    #[test]
    fn test_disconnected_outputs_zero() {
        let slot = VoiceActivitySlot::new();
        let mut node = slot.claim(None, &MicArrayConfig::default()).unwrap();
        assert_eq!(node.status().status_line(), "ReSpeaker v2: Not Found");
        assert_eq!(node.tick(Transport::Playing), VoiceActivity(false));
    }
}
