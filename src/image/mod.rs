//! Subject images, their codec, and the generation client.

pub mod codec;
mod provider;
pub mod providers;
mod types;

pub use codec::{decode_batch, decode_data_uri, decode_upload, to_display_uri};
pub use provider::{compose_directive, GenerationClient, ENHANCE_DIRECTIVE};
pub use types::{
    AspectRatio, Composition, GenerationResult, ImageFormat, ImagePart, SubjectImage, UploadFile,
    UploadSource,
};
