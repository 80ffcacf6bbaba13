#![warn(missing_docs)]
//! Photoshoot - compose subject photographs into a new scene with Gemini.
//!
//! Upload one or more subject photos, optionally enhance them, describe a
//! scene, and get back a single image that places every subject in it.
//!
//! # Quick Start
//!
//! ```no_run
//! use photoshoot::{UploadFile, WorkflowController};
//!
//! #[tokio::main]
//! async fn main() -> photoshoot::Result<()> {
//!     let workflow = WorkflowController::builder().build()?;
//!     workflow
//!         .upload(&[UploadFile::from_path("dog.jpg"), UploadFile::from_path("cat.png")])
//!         .await?;
//!     workflow.enhance().await?;
//!     workflow.set_prompt("both pets having a picnic in a sunny park");
//!     workflow.generate().await?;
//!
//!     if let Some(result) = workflow.state().result {
//!         println!("{}", result.image_uri);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `gemini`: Gemini (Google) generation client
//! - `cli`: Command-line interface

mod error;
pub mod image;
pub mod session;
pub mod workflow;

// Re-export error types at crate root
pub use error::{PhotoshootError, Result};

pub use image::{
    AspectRatio, Composition, GenerationClient, GenerationResult, ImageFormat, ImagePart,
    SubjectImage, UploadFile,
};

#[cfg(feature = "gemini")]
pub use image::providers::{GeminiClient, GeminiClientBuilder, GeminiModel};

pub use session::{FileSessionStore, MemorySessionStore, PartialSession, SessionRecord, SessionStore};

pub use workflow::{
    ActionOutcome, Phase, WorkflowConfig, WorkflowController, WorkflowControllerBuilder,
    WorkflowState,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{PhotoshootError, Result};
    pub use crate::image::{GenerationClient, SubjectImage, UploadFile};
    pub use crate::session::SessionStore;
    pub use crate::workflow::{ActionOutcome, WorkflowController};

    #[cfg(feature = "gemini")]
    pub use crate::image::providers::GeminiClient;
}
