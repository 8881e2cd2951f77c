//! Core data models shared by the index, history, agent loop, and server.
//!
//! [`Chunk`] and [`HistoryEntry`] are the two persisted record types; the
//! rest describe messages and reports that flow between components.

use serde::{Deserialize, Serialize};

/// A slice of source-document text paired with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(rename = "vec")]
    pub vector: Vec<f32>,
    pub source: String,
}

/// Role tag of a message sent to the completion model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// The subset of roles that are persisted in conversation history.
///
/// System messages are scratch state of a single agent run and never
/// reach the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

impl HistoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryRole::User => "user",
            HistoryRole::Assistant => "assistant",
        }
    }
}

impl From<HistoryRole> for Role {
    fn from(role: HistoryRole) -> Self {
        match role {
            HistoryRole::User => Role::User,
            HistoryRole::Assistant => Role::Assistant,
        }
    }
}

/// A role-tagged message in a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One persisted turn of conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
    /// Seconds since the Unix epoch. Entries written before timestamps
    /// existed deserialize as `0.0` and are evicted on load.
    #[serde(default)]
    pub timestamp: f64,
}

impl HistoryEntry {
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role.into(),
            content: self.content.clone(),
        }
    }
}

/// One generate/execute cycle of the agent loop, kept for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStep {
    /// Model text preceding the code fence.
    pub thought: String,
    pub code: String,
    pub result: String,
}

impl AgentStep {
    /// Human-readable rendering used by the CLI.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        if !self.thought.is_empty() {
            out.push_str(&format!("thought: {}\n", self.thought));
        }
        out.push_str(&format!("code:\n{}\nresult: {}", self.code, self.result));
        out
    }
}

/// Outcome of ingesting a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Success,
    Empty,
    Error,
    /// Reported by index status for chunks loaded from the snapshot.
    Cached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatus {
    pub name: String,
    pub status: FileState,
    pub chunks: usize,
}

/// Overall status of a document sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub message: String,
    pub files: Vec<FileStatus>,
}

/// Summary of what the similarity index currently holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub total_chunks: usize,
    pub files: Vec<FileStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serializes_vector_as_vec() {
        let chunk = Chunk {
            text: "hello".to_string(),
            vector: vec![0.5, 1.0],
            source: "a.docx".to_string(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["vec"], serde_json::json!([0.5, 1.0]));
        assert_eq!(json["source"], "a.docx");
    }

    #[test]
    fn history_entry_without_timestamp_defaults_to_epoch() {
        let entry: HistoryEntry =
            serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(entry.timestamp, 0.0);
        assert_eq!(entry.to_message(), ChatMessage::user("hi"));
    }

    #[test]
    fn history_role_rejects_system() {
        let parsed = serde_json::from_str::<HistoryEntry>(
            r#"{"role":"system","content":"x","timestamp":1.0}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(
            serde_json::to_value(SyncStatus::Warning).unwrap(),
            serde_json::json!("warning")
        );
        assert_eq!(
            serde_json::to_value(FileState::Cached).unwrap(),
            serde_json::json!("cached")
        );
    }
}
