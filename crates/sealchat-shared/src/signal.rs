//! Call-setup signaling records exchanged through the relay mailbox.

use serde::{Deserialize, Serialize};

use crate::types::{ChatId, SignalId, TimestampMillis, UserId};

/// One signaling step. Closed set: an unknown `type` fails to deserialize
/// rather than being dropped on the floor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum SignalBody {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    IceCandidate {
        candidate: String,
        #[serde(default)]
        sdp_mid: Option<String>,
        #[serde(default)]
        sdp_mline_index: Option<u16>,
    },
}

impl SignalBody {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Offer { .. } => SignalKind::Offer,
            Self::Answer { .. } => SignalKind::Answer,
            Self::IceCandidate { .. } => SignalKind::IceCandidate,
        }
    }

    /// JSON text stored in the relay's payload column.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub id: SignalId,
    pub chat_id: ChatId,
    pub from: UserId,
    /// `None` addresses every other member of the chat.
    pub to: Option<UserId>,
    pub body: SignalBody,
    pub created_at: TimestampMillis,
    pub expires_at: TimestampMillis,
    #[serde(default)]
    pub consumed: bool,
}

impl SignalRecord {
    pub fn is_expired_at(&self, now: TimestampMillis) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let body = SignalBody::IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        };
        let value: serde_json::Value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["type"], "ice-candidate");
        assert_eq!(value["payload"]["sdp_mid"], "0");

        let offer = serde_json::to_value(SignalBody::Offer { sdp: "v=0".into() }).unwrap();
        assert_eq!(offer, serde_json::json!({"type": "offer", "payload": {"sdp": "v=0"}}));
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        let err = SignalBody::from_json(r#"{"type":"hangup","payload":{}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(SignalBody::Answer { sdp: String::new() }.kind(), SignalKind::Answer);
        assert_eq!(SignalKind::IceCandidate.to_string(), "ice-candidate");
    }

    #[test]
    fn test_expiry_boundary() {
        let record = SignalRecord {
            id: SignalId::new(),
            chat_id: ChatId::new(),
            from: UserId::new(),
            to: None,
            body: SignalBody::Offer { sdp: "v=0".into() },
            created_at: 1_000,
            expires_at: 31_000,
            consumed: false,
        };
        assert!(!record.is_expired_at(30_999));
        assert!(record.is_expired_at(31_000));
    }
}
