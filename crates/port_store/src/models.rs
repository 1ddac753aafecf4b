//! Row types read back from the connections and contacts tables.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct ConnectionRow {
    pub chat_id: String,
    pub connection_type: i64,
    pub name: Option<String>,
    pub new_message_count: i64,
    pub folder_id: Option<String>,
    /// Equal to `chat_id` once back-filled; all zeros before.
    pub routing_id: String,
    pub pair_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
#[sqlx(rename_all = "camelCase")]
pub struct ContactRow {
    /// 64 hex chars identifying the contact pair.
    pub pair_hash: String,
    pub name: Option<String>,
    pub display_pic: Option<String>,
    pub notes: Option<String>,
    pub connected_on: Option<String>,
    pub connection_source: Option<String>,
}
