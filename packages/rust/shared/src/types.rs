//! Core domain types for the dashscrape chunk pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Chunk `type` recorded for rows that come from the dashboard tables.
pub const CHUNK_TYPE_DASHBOARD: &str = "PowerBI";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for ingest run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ChunkRecord
// ---------------------------------------------------------------------------

/// One retrievable text chunk, in the column layout the embedding stage reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Source identifier (a record id for dashboard rows, a file hash for documents).
    pub file_hash: String,
    /// Human-readable source name.
    pub file_name: String,
    /// Page within the source document.
    pub page: i64,
    /// Heading depth of the chunk.
    pub level: i64,
    /// Source kind, e.g. [`CHUNK_TYPE_DASHBOARD`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Section header the chunk sits under.
    pub header: String,
    /// Chunk text.
    pub chunk: String,
    /// Optional layout block reference.
    pub bloc: Option<String>,
}

// ---------------------------------------------------------------------------
// FileTrackerEntry
// ---------------------------------------------------------------------------

/// Processing state of one source in the files tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTrackerEntry {
    pub file_hash: String,
    pub file_name: String,
    /// Seen in the most recent source listing.
    pub present_in_last_update: bool,
    /// Chunks have been extracted.
    pub parsed: bool,
    /// Chunks have been embedded by the external embedding stage.
    pub embedded: bool,
    /// Embeddings have been loaded into the vector index.
    pub indexed: bool,
}

/// SHA-256 hex digest of chunk text, used to skip unchanged rewrites.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn chunk_record_serializes_type_column() {
        let chunk = ChunkRecord {
            file_hash: "638159590404564717".into(),
            file_name: "Government, France".into(),
            page: 0,
            level: 0,
            kind: CHUNK_TYPE_DASHBOARD.into(),
            header: "Core Principles".into(),
            chunk: "Open and inclusive".into(),
            bloc: None,
        };

        let json = serde_json::to_value(&chunk).expect("serialize");
        assert_eq!(json["type"], "PowerBI");
        assert!(json["bloc"].is_null());
    }

    #[test]
    fn test_content_hash() {
        let hash = content_hash("hello world");
        assert_eq!(hash.len(), 64); // SHA-256 = 64 hex chars
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
