use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One structured item produced by a connector.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub task_id: i64,
    pub execution_id: i64,
    pub data: Record,
    pub collected_at: DateTime<Utc>,
}
