use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, MessageId, PlayerId, RegionName, SectorIndex, TeamId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Audience {
    Players(Vec<PlayerId>),
    Team(TeamId),
    Sector(SectorIndex),
    Region(RegionName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "high")]
    High,
    #[serde(rename = "urgent")]
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub payload: serde_json::Value,
}

/// Optional coordinate payload: a sector the message points at.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub region: RegionName,
    pub sector: SectorIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub author: AccountId,
    pub audience: Audience,
    pub subject: String,
    /// Body after allow-list sanitization; raw input is never stored.
    pub body: String,
    pub priority: Priority,
    pub attachments: Vec<Attachment>,
    pub coordinates: Option<Coordinates>,
    pub expires_at: Option<DateTime<Utc>>,
    pub requires_confirmation: bool,
    /// Threading by parent reference.
    pub parent: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

/// Per-recipient read state, stored separately from the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceipt {
    pub message: MessageId,
    pub recipient: PlayerId,
    pub read_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub deleted: bool,
}

pub const MESSAGE_SUBJECT_MAX: usize = 200;
pub const MESSAGE_BODY_MAX: usize = 8192;

impl Message {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let msg = Message {
            id: MessageId::new(),
            author: AccountId::new(),
            audience: Audience::Sector(SectorIndex(5)),
            subject: "contact".to_string(),
            body: "hostiles in 5".to_string(),
            priority: Priority::Urgent,
            attachments: vec![],
            coordinates: None,
            expires_at: Some(now + chrono::Duration::minutes(5)),
            requires_confirmation: false,
            parent: None,
            created_at: now,
        };
        assert!(!msg.is_expired(now));
        assert!(msg.is_expired(now + chrono::Duration::minutes(6)));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::Normal > Priority::Low);
    }
}
