//! Upload targets and the JSON bodies exchanged with the upload API.

use crate::models::multipart::{CompletedPart, Part};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// What is being uploaded. Decides the accepted content-type family and the
/// key segment the object lands under.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Video,
    Thumbnail,
}

impl UploadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadKind::Video => "video",
            UploadKind::Thumbnail => "thumbnail",
        }
    }

    /// Content-type prefix a declared type must start with.
    pub fn content_type_family(&self) -> &'static str {
        match self {
            UploadKind::Video => "video/",
            UploadKind::Thumbnail => "image/",
        }
    }

    /// Used when the file itself does not say what it is.
    pub fn default_content_type(&self) -> &'static str {
        match self {
            UploadKind::Video => "video/mp4",
            UploadKind::Thumbnail => "image/jpeg",
        }
    }

    pub fn accepts(&self, content_type: &str) -> bool {
        content_type
            .to_ascii_lowercase()
            .starts_with(self.content_type_family())
    }
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(UploadKind::Video),
            "thumbnail" => Ok(UploadKind::Thumbnail),
            other => Err(format!("unknown upload kind `{}`", other)),
        }
    }
}

/// The logical `(owner, contextId, kind)` address callers use, e.g. "the video
/// for export X". Many object keys map onto one target over time.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UploadTarget {
    pub owner: String,
    pub context_id: String,
    pub kind: UploadKind,
}

impl UploadTarget {
    pub fn new(owner: impl Into<String>, context_id: impl Into<String>, kind: UploadKind) -> Self {
        Self {
            owner: owner.into(),
            context_id: context_id.into(),
            kind,
        }
    }

    /// Stable identifier used to key client-local session state.
    pub fn storage_id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.owner.to_ascii_lowercase(),
            self.context_id,
            self.kind
        )
    }
}

/// `POST /presign`
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    pub owner: String,
    pub context_id: String,
    pub kind: UploadKind,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum PresignResponse {
    #[serde(rename_all = "camelCase")]
    Single {
        key: String,
        public_url: String,
        upload_url: String,
        required_headers: BTreeMap<String, String>,
        expires_in_seconds: u64,
    },
    #[serde(rename_all = "camelCase")]
    Multipart {
        key: String,
        public_url: String,
        upload_id: String,
        part_size_bytes: u64,
        expires_in_seconds: u64,
    },
}

impl PresignResponse {
    pub fn key(&self) -> &str {
        match self {
            PresignResponse::Single { key, .. } | PresignResponse::Multipart { key, .. } => key,
        }
    }
}

/// `POST /multipart/sign-part`
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SignPartRequest {
    pub key: String,
    pub upload_id: String,
    pub part_number: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SignPartResponse {
    pub upload_url: String,
    pub expires_in_seconds: u64,
}

/// `GET /multipart/list-parts?key=&uploadId=`
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ListPartsQuery {
    pub key: String,
    pub upload_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ListPartsResponse {
    pub parts: Vec<Part>,
}

/// `POST /multipart/complete`
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub key: String,
    pub public_url: String,
}

/// `POST /multipart/abort`
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AbortRequest {
    pub key: String,
    pub upload_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AbortResponse {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn presign_response_is_tagged_by_strategy() {
        let single = PresignResponse::Single {
            key: "uploads/a/b/video/x-clip.mp4".into(),
            public_url: "https://cdn.example/uploads/a/b/video/x-clip.mp4".into(),
            upload_url: "https://s3.example/put".into(),
            required_headers: BTreeMap::from([("Content-Type".into(), "video/mp4".into())]),
            expires_in_seconds: 600,
        };
        let value = serde_json::to_value(&single).unwrap();
        assert_eq!(value["strategy"], "single");
        assert_eq!(value["uploadUrl"], "https://s3.example/put");
        assert_eq!(value["expiresInSeconds"], 600);
        assert_eq!(value["requiredHeaders"]["Content-Type"], "video/mp4");

        let multipart: PresignResponse = serde_json::from_value(json!({
            "strategy": "multipart",
            "key": "k",
            "publicUrl": "u",
            "uploadId": "up-1",
            "partSizeBytes": 10485760u64,
            "expiresInSeconds": 600
        }))
        .unwrap();
        assert!(matches!(
            multipart,
            PresignResponse::Multipart { part_size_bytes: 10485760, .. }
        ));
    }

    #[test]
    fn kind_accepts_only_its_family() {
        assert!(UploadKind::Video.accepts("video/mp4"));
        assert!(UploadKind::Video.accepts("Video/QuickTime"));
        assert!(!UploadKind::Video.accepts("image/png"));
        assert!(UploadKind::Thumbnail.accepts("image/webp"));
        assert_eq!("THUMBNAIL".parse::<UploadKind>(), Ok(UploadKind::Thumbnail));
        assert!("audio".parse::<UploadKind>().is_err());
    }

    #[test]
    fn storage_id_lowercases_owner() {
        let a = UploadTarget::new("0xABCDEF", "export-1", UploadKind::Video);
        let b = UploadTarget::new("0xabcdef", "export-1", UploadKind::Video);
        assert_eq!(a.storage_id(), b.storage_id());
        assert_eq!(a.storage_id(), "0xabcdef:export-1:video");
    }
}
