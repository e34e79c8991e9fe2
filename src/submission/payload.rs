//! Submission payloads: recorded/uploaded audio or typed text.
//!
//! A [`Payload`] only ever lives in process memory. It is handed to the
//! orchestrator for the duration of one run and is never persisted.

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::config::SubmissionConfig;

/// Content type used for in-browser style recordings.
pub const RECORDING_CONTENT_TYPE: &str = "audio/webm";

/// Content type used when a file extension is not recognised.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type declared for typed text submissions.
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

/// Reasons a payload is rejected before it enters the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("submission is empty")]
    Empty,

    #[error("audio is {size} bytes, the limit is {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("please limit your submission to {max} words (current count: {count})")]
    TooManyWords { count: usize, max: usize },
}

/// Raw submission input.
#[derive(Clone, PartialEq, Eq)]
pub enum Payload {
    /// Audio bytes with their declared content type.
    Audio { bytes: Vec<u8>, content_type: String },
    /// Typed text; becomes the transcript directly.
    Text(String),
}

impl Payload {
    /// Wrap audio bytes with an explicit content type.
    pub fn audio(
        bytes: Vec<u8>,
        content_type: impl Into<String>,
        limits: &SubmissionConfig,
    ) -> Result<Self, PayloadError> {
        if bytes.is_empty() {
            return Err(PayloadError::Empty);
        }
        if bytes.len() > limits.max_payload_bytes {
            return Err(PayloadError::TooLarge {
                size: bytes.len(),
                max: limits.max_payload_bytes,
            });
        }
        Ok(Payload::Audio {
            bytes,
            content_type: content_type.into(),
        })
    }

    /// Audio captured by a recorder (declared as `audio/webm`).
    pub fn recording(bytes: Vec<u8>, limits: &SubmissionConfig) -> Result<Self, PayloadError> {
        Self::audio(bytes, RECORDING_CONTENT_TYPE, limits)
    }

    /// Audio from an uploaded file; the content type comes from its extension.
    pub fn from_file_name(
        file_name: &str,
        bytes: Vec<u8>,
        limits: &SubmissionConfig,
    ) -> Result<Self, PayloadError> {
        Self::audio(bytes, content_type_for_file_name(file_name), limits)
    }

    /// Typed text, bounded by `limits.max_text_words`.
    pub fn text(text: impl Into<String>, limits: &SubmissionConfig) -> Result<Self, PayloadError> {
        let text = text.into();
        let count = word_count(&text);
        if count == 0 {
            return Err(PayloadError::Empty);
        }
        if count > limits.max_text_words {
            return Err(PayloadError::TooManyWords {
                count,
                max: limits.max_text_words,
            });
        }
        Ok(Payload::Text(text))
    }

    pub fn content_type(&self) -> &str {
        match self {
            Payload::Audio { content_type, .. } => content_type,
            Payload::Text(_) => TEXT_CONTENT_TYPE,
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Payload::Audio { bytes, .. } => bytes.len(),
            Payload::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes as sent over the wire.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Audio { bytes, .. } => bytes,
            Payload::Text(text) => text.as_bytes(),
        }
    }
}

// Audio bytes are never dumped into logs.
impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Audio { bytes, content_type } => f
                .debug_struct("Audio")
                .field("content_type", content_type)
                .field("len", &bytes.len())
                .finish(),
            Payload::Text(text) => f.debug_struct("Text").field("len", &text.len()).finish(),
        }
    }
}

/// Whitespace-separated word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Map an audio file extension (without the dot) to its declared type.
///
/// ```
/// use submission_pipeline::submission::content_type_for_extension;
///
/// assert_eq!(content_type_for_extension("M4A"), "audio/mp4");
/// assert_eq!(content_type_for_extension("xyz"), "application/octet-stream");
/// ```
pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "webm" => "audio/webm",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// Content type for a file name, using the part after its last dot.
pub fn content_type_for_file_name(file_name: &str) -> &'static str {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(content_type_for_extension)
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}
