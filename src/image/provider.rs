//! Generation client trait and utilities.

use crate::error::Result;
use crate::image::types::{Composition, ImagePart};
use async_trait::async_trait;

/// Directive sent alongside each image in an enhancement request.
pub const ENHANCE_DIRECTIVE: &str = "Professionally enhance this photograph. Improve lighting, \
clarity, color balance, and sharpness. Do not add, remove, or change any subjects or elements \
in the image. Respond with only the enhanced image.";

/// Builds the text part that follows the subject images in a compose
/// request.
pub fn compose_directive(prompt: &str) -> String {
    format!(
        "Create a single, cohesive image that incorporates all of the subjects from the \
         images provided. The scene should be: {prompt}"
    )
}

/// A remote service able to enhance and compose subject images.
///
/// Implementations perform exactly one request per call and never retry;
/// [`WorkflowController::generate_with_retries`] retries at the workflow level.
///
/// [`WorkflowController::generate_with_retries`]: crate::WorkflowController::generate_with_retries
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Improves the quality of one image without altering its content.
    ///
    /// Every failure is reported as [`PhotoshootError::Enhancement`].
    ///
    /// [`PhotoshootError::Enhancement`]: crate::PhotoshootError::Enhancement
    async fn enhance(&self, image: &ImagePart) -> Result<ImagePart>;

    /// Composes all `images`, in order, into one scene described by `prompt`.
    async fn compose(&self, images: &[ImagePart], prompt: &str) -> Result<Composition>;

    /// Returns the name of this client for display.
    fn name(&self) -> &str;

    /// Checks if the service is reachable and authenticated.
    async fn health_check(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_directive_wraps_prompt() {
        let text = compose_directive("on a beach at sunset");
        assert!(text.starts_with("Create a single, cohesive image"));
        assert!(text.ends_with("The scene should be: on a beach at sunset"));
    }
}
