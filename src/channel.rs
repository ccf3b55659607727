//! The array's fixed channel layout.

use std::fmt;
use std::str::FromStr;

use crate::MicArrayError;

/// Number of channels delivered by the array firmware.
pub const CHANNEL_COUNT: usize = 6;

/// One of the six channels of the array, in hardware order.
///
/// # Example
///
/// ```
/// use mic_array_stream::Channel;
///
/// let ch = Channel::from_index(5).unwrap();
/// assert_eq!(ch, Channel::PlaybackReference);
/// assert_eq!(ch.label(), "Playback Reference");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Channel {
    /// Beamformed output after echo cancellation.
    #[default]
    Processed,
    /// Raw microphone element 1.
    Mic1,
    /// Raw microphone element 2.
    Mic2,
    /// Raw microphone element 3.
    Mic3,
    /// Raw microphone element 4.
    Mic4,
    /// Loopback of the audio being played back.
    PlaybackReference,
}

impl Channel {
    /// All channels in hardware order.
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::Processed,
        Channel::Mic1,
        Channel::Mic2,
        Channel::Mic3,
        Channel::Mic4,
        Channel::PlaybackReference,
    ];

    /// Looks a channel up by its hardware index.
    pub fn from_index(index: usize) -> Result<Self, MicArrayError> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(MicArrayError::InvalidChannel { index })
    }

    /// Hardware index of the channel (0-5).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Label shown in the channel selector.
    pub fn label(self) -> &'static str {
        match self {
            Channel::Processed => "AEC + Beamformed",
            Channel::Mic1 => "Mic #1 (raw)",
            Channel::Mic2 => "Mic #2 (raw)",
            Channel::Mic3 => "Mic #3 (raw)",
            Channel::Mic4 => "Mic #4 (raw)",
            Channel::PlaybackReference => "Playback Reference",
        }
    }

    /// Selector labels in hardware order.
    pub fn labels() -> [&'static str; CHANNEL_COUNT] {
        Self::ALL.map(Channel::label)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Channel {
    type Err = MicArrayError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ch| ch.label() == label)
            .ok_or_else(|| MicArrayError::UnknownChannelLabel {
                label: label.to_string(),
            })
    }
}

impl TryFrom<usize> for Channel {
    type Error = MicArrayError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Self::from_index(index)
    }
}
