//! Core types for subject images and compositions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Image formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    #[default]
    Png,
    /// JPEG format (lossy).
    Jpeg,
}

impl ImageFormat {
    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    /// Attempts to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    /// Parses a declared MIME type. `image/jpg` is accepted as a common
    /// misspelling of `image/jpeg`.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.trim().to_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

/// Aspect ratio hint for the composed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectRatio {
    /// 1:1.
    #[default]
    Square,
    /// Taller than wide.
    Portrait,
    /// Wider than tall.
    Landscape,
}

impl AspectRatio {
    /// Returns the lowercase name used in the session record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "square",
            Self::Portrait => "portrait",
            Self::Landscape => "landscape",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An image as exchanged with the generation service: base64 payload plus
/// its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePart {
    /// Base64-encoded image bytes.
    pub payload: String,
    /// MIME type of the encoded bytes.
    pub media_type: String,
}

impl ImagePart {
    /// Creates a new image part.
    pub fn new(payload: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            media_type: media_type.into(),
        }
    }
}

/// One uploaded (or enhanced) subject photograph.
///
/// Serialized with the field names the session record has always used
/// (`data`, `mimeType`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectImage {
    /// Opaque id, unique within the active subject set.
    pub id: String,
    /// Base64-encoded image bytes.
    #[serde(rename = "data", alias = "payload")]
    pub payload: String,
    /// MIME type of the image.
    #[serde(rename = "mimeType", alias = "mediaType")]
    pub media_type: String,
}

impl SubjectImage {
    /// Returns the transport record for this subject.
    pub fn to_part(&self) -> ImagePart {
        ImagePart::new(self.payload.clone(), self.media_type.clone())
    }

    /// Replaces the image content, keeping the id.
    pub fn replace_content(&mut self, part: ImagePart) {
        self.payload = part.payload;
        self.media_type = part.media_type;
    }
}

/// Output of a compose call. Either field may be absent, but never both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composition {
    /// `data:` URI of the last image part in the response.
    pub image_uri: Option<String>,
    /// All text parts of the response, space-joined in arrival order.
    pub note: Option<String>,
}

/// A successful generation as held by the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "generation result should be displayed or saved"]
pub struct GenerationResult {
    /// `data:` URI of the composed image.
    pub image_uri: String,
    /// Accompanying model text, if any.
    pub note: Option<String>,
}

/// Where an upload's bytes come from.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// Read from disk when decoded.
    Path(PathBuf),
    /// Already in memory.
    Bytes(Vec<u8>),
}

/// A file handed to the workflow for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Original file name, used for ids and error messages.
    pub name: String,
    /// Declared MIME type.
    pub media_type: String,
    /// Content source.
    pub source: UploadSource,
}

impl UploadFile {
    /// Creates an upload backed by in-memory bytes.
    pub fn from_bytes(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            source: UploadSource::Bytes(bytes),
        }
    }

    /// Creates an upload backed by a file on disk. The media type is taken
    /// from the extension; unknown extensions are kept verbatim so decoding
    /// reports them as unsupported.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let media_type = ImageFormat::from_extension(ext)
            .map(|f| f.mime_type().to_string())
            .unwrap_or_else(|| format!("application/x-{}", ext.to_lowercase()));
        Self {
            name,
            media_type,
            source: UploadSource::Path(path),
        }
    }
}
