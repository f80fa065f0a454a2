//! Stored blobs and byte-range selection over them.
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// MIME type recorded for blobs whose type could not be detected.
pub const UNKNOWN_MIME_TYPE: &str = "unknown";

/// A stored file as returned by a content store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub content: Bytes,
    pub modified_at: Option<DateTime<Utc>>,
}

impl Blob {
    pub fn new(file_name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: None,
            content: content.into(),
            modified_at: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    /// The MIME type to advertise, if one is known.
    pub fn content_type(&self) -> Option<&str> {
        self.mime_type
            .as_deref()
            .filter(|mime| !mime.is_empty() && *mime != UNKNOWN_MIME_TYPE)
    }

    pub fn content_disposition(&self) -> String {
        format!("attachment;filename={}", self.file_name)
    }

    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Outcome of evaluating a `Range` header against a body length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// Serve the whole body.
    Full,
    /// Serve the inclusive byte span `start..=end`.
    Partial { start: u64, end: u64 },
    /// The range lies outside the body.
    Unsatisfiable,
}

impl ByteRange {
    /// Evaluate a `Range` header value.
    ///
    /// Only a single `bytes=` range is honoured. Multi-range requests and
    /// malformed values fall back to the full body.
    pub fn parse(header: &str, len: u64) -> Self {
        let Some(spec) = header.trim().strip_prefix("bytes=") else {
            return Self::Full;
        };
        if spec.contains(',') {
            return Self::Full;
        }
        let Some((start, end)) = spec.trim().split_once('-') else {
            return Self::Full;
        };
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            let Ok(suffix) = end.parse::<u64>() else {
                return Self::Full;
            };
            if suffix == 0 || len == 0 {
                return Self::Unsatisfiable;
            }
            return Self::Partial {
                start: len.saturating_sub(suffix),
                end: len - 1,
            };
        }

        let Ok(start) = start.parse::<u64>() else {
            return Self::Full;
        };
        if start >= len {
            return Self::Unsatisfiable;
        }
        let end = if end.is_empty() {
            len - 1
        } else {
            match end.parse::<u64>() {
                Ok(end) if end >= start => end.min(len - 1),
                _ => return Self::Full,
            }
        };
        Self::Partial { start, end }
    }
}
