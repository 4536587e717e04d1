use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One decoded event from the server-pushed reply stream.
///
/// The wire discriminator is the `type` field. Unknown discriminators map to
/// [`StreamEvent::Unrecognized`] so new server event kinds surface in logs
/// instead of disappearing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token {
        content: String,
    },
    Status {
        message: String,
    },
    Metadata {
        #[serde(flatten)]
        payload: BTreeMap<String, Vec<String>>,
    },
    Error {
        message: String,
    },
    Done,
    #[serde(other)]
    Unrecognized,
}

/// One chat message, in both wire directions.
///
/// `id` is authoritative once assigned by the server; a locally originated
/// message has no `id` until its server echo arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A finished recording: 16-bit signed mono PCM. Immutable once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Raw little-endian wire body, no container or header.
    pub fn as_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for s in &self.samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        bytes
    }
}

/// Connection state of a persistent message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
    Reconnecting,
}

impl ChannelState {
    pub fn as_u8(self) -> u8 {
        match self {
            ChannelState::Connecting => 0,
            ChannelState::Open => 1,
            ChannelState::Closed => 2,
            ChannelState::Reconnecting => 3,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ChannelState::Open,
            2 => ChannelState::Closed,
            3 => ChannelState::Reconnecting,
            _ => ChannelState::Connecting,
        }
    }
}
