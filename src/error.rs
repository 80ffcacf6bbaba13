//! Error types for the photoshoot workflow.

use std::path::PathBuf;
use std::time::Duration;

/// Maximum length of an upstream error message kept in an error value.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while uploading, enhancing or composing images.
///
/// Variants whose message starts with `Gemini API error` come from the
/// remote generation service; everything else is a local failure.
#[derive(Debug, thiserror::Error)]
pub enum PhotoshootError {
    /// Reading an uploaded file failed.
    #[error("Failed to read {filename}: {source}")]
    Read {
        /// Name of the file that could not be read.
        filename: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Uploaded file is not a PNG or JPEG image.
    #[error("Unsupported media type for {filename}: {media_type} (expected image/png or image/jpeg)")]
    UnsupportedMediaType {
        /// Name of the rejected file.
        filename: String,
        /// Media type the file was declared with.
        media_type: String,
    },

    /// A workflow action was requested before its inputs were ready.
    #[error("{0}")]
    Precondition(String),

    /// Not enough credits for a paid action.
    #[error("{0}")]
    InsufficientCredits(String),

    /// Invalid argument passed to the generation client.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The service answered a generation request without an image.
    #[error("{0}")]
    NoImage(String),

    /// Enhancement of a subject image failed upstream.
    #[error("Gemini API error (enhancement): {0}")]
    Enhancement(String),

    /// The service returned neither an image nor text.
    #[error("Gemini API error: API returned no content. Please try a different prompt or image.")]
    EmptyResponse,

    /// API key missing or rejected.
    #[error("Gemini API error: authentication failed: {0}")]
    Auth(String),

    /// API returned an error response.
    #[error("Gemini API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Sanitized error message from the response body.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Gemini API error: rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Delay suggested by the `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// Content was blocked by safety filters.
    #[error("Gemini API error: content blocked: {0}")]
    ContentBlocked(String),

    /// The service rejected the request parameters.
    #[error("Gemini API error: invalid request: {0}")]
    InvalidRequest(String),

    /// Network or HTTP transport error.
    #[error("Gemini API error: network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// I/O error (e.g., writing the session record).
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PhotoshootError {
    /// Returns true if the error was reported by (or while reaching) the
    /// remote generation service.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::Enhancement(_)
                | Self::EmptyResponse
                | Self::Auth(_)
                | Self::Api { .. }
                | Self::RateLimited { .. }
                | Self::ContentBlocked(_)
                | Self::InvalidRequest(_)
                | Self::Network(_)
        )
    }

    /// Returns true if this error is likely transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns the suggested retry delay, if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            Self::Network(_) => Some(Duration::from_secs(2)),
            Self::Api { status, .. } if *status >= 500 => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Result type alias for photoshoot operations.
pub type Result<T> = std::result::Result<T, PhotoshootError>;

/// Parses a `Retry-After` header given in whole seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Redacts anything that looks like a Google API key and caps the length
/// of an upstream error body.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let mut out = String::with_capacity(text.len().min(MAX_ERROR_MESSAGE_LEN));
    for (i, word) in text.split(' ').enumerate() {
        if i > 0 {
            out.push(' ');
        }
        if word.contains("AIza") {
            out.push_str("[REDACTED]");
        } else {
            out.push_str(word);
        }
    }
    if out.chars().count() > MAX_ERROR_MESSAGE_LEN {
        let truncated: String = out.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        return format!("{truncated}...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(PhotoshootError::RateLimited { retry_after: None }.is_retryable());
        assert!(PhotoshootError::Api {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());

        assert!(!PhotoshootError::Auth("bad key".into()).is_retryable());
        assert!(!PhotoshootError::ContentBlocked("nsfw".into()).is_retryable());
        assert!(!PhotoshootError::EmptyResponse.is_retryable());
        assert!(!PhotoshootError::Precondition("no subjects".into()).is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let rate_limited = PhotoshootError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(60)));

        let rate_limited_no_hint = PhotoshootError::RateLimited { retry_after: None };
        assert_eq!(rate_limited_no_hint.retry_after(), None);

        let auth = PhotoshootError::Auth("bad".into());
        assert_eq!(auth.retry_after(), None);
    }

    #[test]
    fn test_upstream_errors_are_prefixed() {
        let upstream = [
            PhotoshootError::Enhancement("no image".into()),
            PhotoshootError::EmptyResponse,
            PhotoshootError::Api {
                status: 500,
                message: "boom".into(),
            },
            PhotoshootError::ContentBlocked("safety".into()),
        ];
        for err in upstream {
            assert!(err.is_upstream());
            assert!(err.to_string().starts_with("Gemini API error"), "{err}");
        }

        let local = [
            PhotoshootError::Precondition("Upload images before enhancing.".into()),
            PhotoshootError::InsufficientCredits("no credits".into()),
            PhotoshootError::InvalidArgument("empty".into()),
        ];
        for err in local {
            assert!(!err.is_upstream());
            assert!(!err.to_string().starts_with("Gemini API error"), "{err}");
        }
    }

    #[test]
    fn test_read_error_names_file() {
        let err = PhotoshootError::Read {
            filename: "cat.png".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("cat.png"));
    }

    #[test]
    fn test_sanitize_redacts_keys() {
        let msg = sanitize_error_message("invalid key AIzaSyFAKE123 supplied");
        assert_eq!(msg, "invalid key [REDACTED] supplied");
    }

    #[test]
    fn test_sanitize_truncates_long_messages() {
        let long = "x".repeat(MAX_ERROR_MESSAGE_LEN + 10);
        let msg = sanitize_error_message(&long);
        assert!(msg.ends_with("..."));
        assert_eq!(msg.len(), MAX_ERROR_MESSAGE_LEN + 3);
    }

    #[test]
    fn test_error_display() {
        let err = PhotoshootError::Api {
            status: 404,
            message: "Not found".into(),
        };
        assert_eq!(err.to_string(), "Gemini API error: 404 - Not found");
    }
}
