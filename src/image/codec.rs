//! Conversion between uploaded files, subject images and `data:` URIs.

use crate::error::{PhotoshootError, Result};
use crate::image::types::{ImageFormat, SubjectImage, UploadFile, UploadSource};
use base64::Engine;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Distinguishes ids minted in the same millisecond (e.g. one batch).
static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

fn mint_id(filename: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{filename}-{millis}-{seq}")
}

/// Reads one uploaded file and turns it into a [`SubjectImage`].
///
/// Only PNG and JPEG uploads are accepted; the declared media type is
/// checked before any bytes are read and copied to the subject unchanged.
pub async fn decode_upload(file: &UploadFile) -> Result<SubjectImage> {
    if ImageFormat::from_mime_type(&file.media_type).is_none() {
        return Err(PhotoshootError::UnsupportedMediaType {
            filename: file.name.clone(),
            media_type: file.media_type.clone(),
        });
    }

    let bytes = match &file.source {
        UploadSource::Path(path) => {
            tokio::fs::read(path)
                .await
                .map_err(|source| PhotoshootError::Read {
                    filename: file.name.clone(),
                    source,
                })?
        }
        UploadSource::Bytes(bytes) => bytes.clone(),
    };

    tracing::debug!(file = %file.name, size = bytes.len(), "decoded upload");

    Ok(SubjectImage {
        id: mint_id(&file.name),
        payload: base64::engine::general_purpose::STANDARD.encode(&bytes),
        media_type: file.media_type.clone(),
    })
}

/// Decodes a batch of uploads concurrently.
///
/// The batch is all-or-nothing: the first failure is returned and none of
/// the successfully decoded images escape. Output order matches input order.
pub async fn decode_batch(files: &[UploadFile]) -> Result<Vec<SubjectImage>> {
    futures::future::try_join_all(files.iter().map(|file| decode_upload(file))).await
}

/// Formats an image as a `data:<media type>;base64,<payload>` URI.
pub fn to_display_uri(image: &SubjectImage) -> String {
    data_uri(&image.media_type, &image.payload)
}

pub(crate) fn data_uri(media_type: &str, payload: &str) -> String {
    format!("data:{media_type};base64,{payload}")
}

/// Decodes a `data:` URI or bare base64 text into its media type (when the
/// URI names one) and raw bytes.
///
/// Tolerates embedded whitespace and missing `=` padding.
pub fn decode_data_uri(input: &str) -> Result<(Option<String>, Vec<u8>)> {
    let (media_type, b64) = match input.find(";base64,") {
        Some(pos) => {
            let media_type = input[..pos]
                .strip_prefix("data:")
                .filter(|m| !m.is_empty())
                .map(str::to_string);
            (media_type, &input[pos + 8..])
        }
        None => (None, input),
    };

    let cleaned: String = b64.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    if let Ok(data) = base64::engine::general_purpose::STANDARD.decode(&cleaned) {
        return Ok((media_type, data));
    }

    let data = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(cleaned.trim_end_matches('='))
        .map_err(|e| PhotoshootError::Decode(e.to_string()))?;
    Ok((media_type, data))
}
