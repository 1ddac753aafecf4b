//! Request and response bodies of the upload endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct BeginRequest {
    pub parts: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginResponse {
    pub media_id: String,
    pub upload_id: String,
    /// One presigned URL per part, part 1 first.
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest<'a> {
    pub upload_id: &'a str,
    pub media_id: &'a str,
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortRequest<'a> {
    pub media_id: &'a str,
    pub upload_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct PresignResponse {
    pub body: PresignBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignBody {
    pub url: PresignedPost,
    pub media_id: String,
}

/// Form target for a single-shot upload: POST `url` with every field, then
/// the file as the last form part.
#[derive(Debug, Deserialize)]
pub struct PresignedPost {
    pub url: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}
