/// Signed document records posted through the commit endpoint
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document to be signed and committed
///
/// One shape covers every document kind (message, association, profile,
/// timeline, subscription, ack, delete); optional fields are omitted from
/// the serialized text, and that exact text is what gets signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// CCID of the committing account; filled by the commit pipeline
    pub signer: String,

    /// Document kind ("message", "association", "profile", ...)
    #[serde(rename = "type")]
    pub doc_type: String,

    /// Schema URL describing the body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Kind-specific payload
    pub body: Value,

    /// Server-opaque metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,

    /// Well-known name for profile variants
    #[serde(rename = "semanticID", skip_serializing_if = "Option::is_none")]
    pub semantic_id: Option<String>,

    /// Timelines a message document is posted to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timelines: Option<Vec<String>>,

    /// Target resource for associations, acks, and deletes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Association variant discriminator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    /// CKID when signed with a sub-key; absent for master-key signatures
    #[serde(rename = "keyID", skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    /// Signing time; filled by the commit pipeline
    #[serde(rename = "signedAt")]
    pub signed_at: DateTime<Utc>,
}

impl Document {
    /// Start a document of the given kind with an empty body
    ///
    /// `signer`, `keyID`, and `signedAt` are stamped by the commit pipeline.
    pub fn new(doc_type: impl Into<String>, body: Value) -> Self {
        Self {
            signer: String::new(),
            doc_type: doc_type.into(),
            schema: None,
            body,
            meta: None,
            semantic_id: None,
            timelines: None,
            target: None,
            variant: None,
            key_id: None,
            signed_at: Utc::now(),
        }
    }

    /// Set the schema URL
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set the target resource
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set the destination timelines
    pub fn timelines(mut self, timelines: Vec<String>) -> Self {
        self.timelines = Some(timelines);
        self
    }

    /// Set the semantic id
    pub fn semantic_id(mut self, semantic_id: impl Into<String>) -> Self {
        self.semantic_id = Some(semantic_id.into());
        self
    }

    /// Set the association variant
    pub fn variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }
}

/// Body of `POST /api/v1/commit`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    /// The serialized document text, exactly as signed
    pub document: String,

    /// Detached signature over `document`
    pub signature: String,

    /// Registration extras (entity info and invitation), absent for
    /// ordinary commits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_optional_fields_omitted() {
        let doc = Document::new("message", json!({"body": "hello"}))
            .schema("https://schema.concrnt.world/m/markdown.json")
            .timelines(vec!["t1".to_string()]);

        let text = serde_json::to_string(&doc).unwrap();
        assert!(text.contains("\"type\":\"message\""));
        assert!(text.contains("\"timelines\":[\"t1\"]"));
        assert!(!text.contains("keyID"));
        assert!(!text.contains("target"));
        assert!(!text.contains("variant"));
    }

    #[test]
    fn test_document_key_id_serialized_when_present() {
        let mut doc = Document::new("association", json!({}))
            .target("m1")
            .variant("like");
        doc.key_id = Some("cck1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string());

        let text = serde_json::to_string(&doc).unwrap();
        assert!(text.contains("\"keyID\":\"cck1"));
        assert!(text.contains("\"target\":\"m1\""));
    }

    #[test]
    fn test_commit_request_shape() {
        let req = CommitRequest {
            document: "{}".to_string(),
            signature: "deadbeef".to_string(),
            option: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"document\":\"{}\""));
        assert!(!json.contains("option"));
    }
}
