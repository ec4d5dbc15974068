/// Wire data model
///
/// Plain records for everything the protocol serves over `/api/v1`. All
/// timestamps are RFC3339 on the wire; permissive `Option` fields keep the
/// structs deserializable against servers that omit what they don't know.

pub mod document;
pub mod event;
pub mod ids;

pub use document::{CommitRequest, Document};
pub use event::{SocketRequest, TimelineEvent};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, ClientResult};

/// Standard response envelope for every read endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub status: String,
    #[serde(default)]
    pub content: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Unwrap the envelope, requiring `status == "ok"`
    pub fn into_content(self) -> ClientResult<T> {
        if self.status != "ok" {
            return Err(ClientError::Application(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        self.content
            .ok_or_else(|| ClientError::Application("response carried no content".to_string()))
    }
}

/// Promote a stored plain record into its typed form
///
/// The cache stores raw JSON values; typed read helpers reattach the
/// concrete type on the way out.
pub fn promote<T: DeserializeOwned>(value: Value) -> ClientResult<T> {
    serde_json::from_value(value).map_err(|e| ClientError::Serialization(e.to_string()))
}

/// An account root and its home domain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub ccid: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub tag: String,
    /// FQDN of the entity's home domain
    pub domain: String,
    #[serde(default)]
    pub score: i32,
    pub cdate: DateTime<Utc>,
    #[serde(default)]
    pub mdate: Option<DateTime<Utc>>,
}

/// A federated peer domain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub fqdn: String,
    #[serde(default)]
    pub csid: Option<String>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(default)]
    pub cdate: Option<DateTime<Utc>>,
}

/// A message: the unit of timeline content
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// Raw signed document text
    pub document: String,
    pub signature: String,
    #[serde(default)]
    pub timelines: Vec<String>,
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub associations: Option<Vec<Association>>,
    #[serde(default)]
    pub own_associations: Option<Vec<Association>>,
    pub cdate: DateTime<Utc>,
}

/// A reaction attached to a target resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Association {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub target: String,
    #[serde(default)]
    pub variant: Option<String>,
    pub document: String,
    pub signature: String,
    pub cdate: DateTime<Utc>,
}

/// A profile document published by an account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub document: String,
    pub signature: String,
    #[serde(rename = "semanticID", default)]
    pub semantic_id: Option<String>,
    pub cdate: DateTime<Utc>,
    #[serde(default)]
    pub mdate: Option<DateTime<Utc>>,
}

/// Timeline metadata (not its contents)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub id: String,
    #[serde(default)]
    pub indexable: bool,
    pub author: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub policy: Option<String>,
    pub document: String,
    pub signature: String,
    pub cdate: DateTime<Utc>,
    #[serde(default)]
    pub mdate: Option<DateTime<Utc>>,
}

/// Membership of a resource in a timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineItem {
    #[serde(rename = "resourceID")]
    pub resource_id: String,
    #[serde(rename = "timelineID", default)]
    pub timeline_id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub cdate: Option<DateTime<Utc>>,
}

/// A named collection of timelines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub indexable: bool,
    #[serde(default)]
    pub schema: Option<String>,
    pub document: String,
    pub signature: String,
    #[serde(default)]
    pub items: Vec<SubscriptionItem>,
    pub cdate: DateTime<Utc>,
    #[serde(default)]
    pub mdate: Option<DateTime<Utc>>,
}

/// One timeline inside a subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionItem {
    pub id: String,
    pub subscription: String,
    #[serde(rename = "resolverType", default)]
    pub resolver_type: Option<i32>,
}

/// An enacted (and possibly revoked) sub-key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnactedKey {
    pub id: String,
    pub root: String,
    pub parent: String,
    pub enact_document: String,
    pub enact_signature: String,
    #[serde(default)]
    pub revoke_document: Option<String>,
    #[serde(default)]
    pub revoke_signature: Option<String>,
    #[serde(default)]
    pub valid_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

/// A follow edge between two accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

/// A raw server-side key-value record (`GET|PUT /kv/:key`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvEntry {
    pub key: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_ok() {
        let json = r#"{"status":"ok","content":{"key":"k","value":"v"}}"#;
        let resp: ApiResponse<KvEntry> = serde_json::from_str(json).unwrap();
        let entry = resp.into_content().unwrap();
        assert_eq!(entry.key, "k");
    }

    #[test]
    fn test_envelope_error() {
        let json = r#"{"status":"error","error":"no such entity"}"#;
        let resp: ApiResponse<Entity> = serde_json::from_str(json).unwrap();
        match resp.into_content() {
            Err(ClientError::Application(msg)) => assert_eq!(msg, "no such entity"),
            other => panic!("expected application error, got {:?}", other),
        }
    }

    #[test]
    fn test_entity_roundtrip() {
        let json = r#"{
            "ccid": "con1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "tag": "",
            "domain": "ariake.concrnt.net",
            "cdate": "2024-01-01T00:00:00Z"
        }"#;
        let entity: Entity = serde_json::from_str(json).unwrap();
        assert_eq!(entity.domain, "ariake.concrnt.net");
        assert_eq!(entity.score, 0);
        assert!(entity.alias.is_none());
    }

    #[test]
    fn test_promote() {
        let value = json!({
            "id": "m1",
            "author": "con1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "document": "{}",
            "signature": "00",
            "cdate": "2024-01-01T00:00:00Z"
        });
        let message: Message = promote(value).unwrap();
        assert_eq!(message.id, "m1");
        assert!(message.timelines.is_empty());

        let bad: ClientResult<Message> = promote(json!({"id": "m1"}));
        assert!(matches!(bad, Err(ClientError::Serialization(_))));
    }
}
