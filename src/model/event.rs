/// Realtime timeline event frames
use super::document::Document;
use super::TimelineItem;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → server frames on the realtime socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SocketRequest {
    /// Replace the server-side channel set with `channels`
    Listen { channels: Vec<String> },
    /// Announce a shrunken channel set
    Unlisten { channels: Vec<String> },
    /// Heartbeat
    H,
    /// Liveness probe
    Ping,
}

/// A single server → client event on the realtime socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    /// Timeline the event was observed on
    pub timeline: String,

    /// Timeline membership record for the resource
    pub item: Option<TimelineItem>,

    /// The affected resource (message, association, ...) as the server
    /// currently sees it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,

    /// Raw signed document text, when the event carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,

    /// Parsed form of `document`
    #[serde(
        rename = "parsedDoc",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub parsed_doc: Option<Document>,
}

impl TimelineEvent {
    /// Kind of the embedded document, if any
    pub fn document_type(&self) -> Option<&str> {
        self.parsed_doc.as_ref().map(|d| d.doc_type.as_str())
    }

    /// `id` field of the embedded resource, if present
    pub fn resource_id(&self) -> Option<&str> {
        self.resource.as_ref()?.get("id")?.as_str()
    }

    /// `target` field of the embedded resource, if present
    pub fn resource_target(&self) -> Option<&str> {
        self.resource.as_ref()?.get("target")?.as_str()
    }
}
