use serde::{Deserialize, Serialize};

/// (hash, timestamp, uploader) triple recorded on the external ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorEntry {
    pub file_hash: String,
    pub timestamp: i64,
    pub uploader: String,
}

/// Receipt returned by a successful ledger write.
///
/// `anchor_block` is absent when the ledger does not expose positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorReceipt {
    pub anchor_id: String,
    pub anchor_block: Option<i64>,
}

/// Result of comparing a caller-supplied hash against the ledger.
#[derive(Debug, Serialize)]
pub struct VerificationReport {
    pub verified: bool,
    pub provided_hash: String,
    pub anchored_hash: Option<String>,
    pub timestamp: Option<i64>,
    pub uploader: Option<String>,
}
