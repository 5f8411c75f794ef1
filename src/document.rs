//! Fetched documents
//!
//! A `FetchedDocument` is the immutable unit that flows from the fetcher into
//! extraction and persistence. Its identity is the SHA-256 of its body, so
//! the same bytes fetched twice (or through different fetch modes) share one
//! content hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// Broad content category used for routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Html,
    Pdf,
    Image,
    Other,
}

impl ContentKind {
    /// Maps a MIME type to a content kind
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "text/html" | "application/xhtml+xml" | "text/plain" => Self::Html,
            "application/pdf" | "application/x-pdf" => Self::Pdf,
            m if m.starts_with("image/") => Self::Image,
            _ => Self::Other,
        }
    }
}

/// Raw content retrieved for one crawl task
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDocument {
    /// Id of the target the document was fetched for
    pub target_id: String,
    /// Originating (normalized) URL
    pub url: String,
    /// Declared or sniffed MIME type, without parameters
    pub content_type: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
    /// Hex-encoded SHA-256 of `body`
    pub content_hash: String,
}

impl FetchedDocument {
    /// Creates a document and computes its content hash
    ///
    /// # Arguments
    ///
    /// * `target_id` - Target the document belongs to
    /// * `url` - URL it was fetched from
    /// * `declared_type` - Content-Type header, if any
    /// * `body` - Raw bytes
    /// * `fetched_at` - Fetch timestamp
    pub fn new(
        target_id: impl Into<String>,
        url: impl Into<String>,
        declared_type: Option<&str>,
        body: Vec<u8>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let url = url.into();
        let content_type = sniff_mime(declared_type, &body, &url);
        let content_hash = content_hash(&body);
        Self {
            target_id: target_id.into(),
            url,
            content_type,
            body,
            fetched_at,
            content_hash,
        }
    }

    pub fn kind(&self) -> ContentKind {
        ContentKind::from_mime(&self.content_type)
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Hex-encoded SHA-256 of a document body
pub fn content_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Determines the MIME type of a body
///
/// Magic bytes win over the declared header (servers routinely label PDFs
/// as `application/octet-stream`), the header wins over the URL extension.
pub fn sniff_mime(declared: Option<&str>, body: &[u8], url: &str) -> String {
    if let Some(mime) = sniff_magic(body) {
        return mime.to_string();
    }

    if let Some(declared) = declared {
        let essence = declared
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if !essence.is_empty() && essence != "application/octet-stream" {
            return essence;
        }
    }

    let path = url.split(['?', '#']).next().unwrap_or("");
    let file_name = path.rsplit('/').next().unwrap_or("").to_ascii_lowercase();
    let extension = match file_name.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => "",
    };
    match extension {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "htm" | "html" | "php" | "jsp" | "aspx" => "text/html",
        _ => {
            let head = String::from_utf8_lossy(&body[..body.len().min(512)]).to_ascii_lowercase();
            if head.contains("<html") || head.contains("<!doctype html") || head.contains("<body") {
                "text/html"
            } else {
                "application/octet-stream"
            }
        }
    }
    .to_string()
}

fn sniff_magic(body: &[u8]) -> Option<&'static str> {
    if body.starts_with(b"%PDF-") {
        Some("application/pdf")
    } else if body.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if body.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if body.starts_with(b"GIF87a") || body.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if body.len() >= 12 && &body[..4] == b"RIFF" && &body[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}
