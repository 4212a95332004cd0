use anyhow::Result;
use munje_contracts::models::GenerationParams;

use crate::preprocess::ImagePayload;

#[derive(Debug, Clone, Copy)]
pub struct InvokeRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub image: &'a ImagePayload,
    pub params: &'a GenerationParams,
}

/// One upstream model call: instruction + image in, raw reply text out.
///
/// Errors are rendered to text and classified by the generator, so
/// implementations should keep upstream status codes and error bodies in the
/// error message.
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &str;
    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<String>;
}

impl<P: VisionProvider + ?Sized> VisionProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<String> {
        (**self).invoke(request)
    }
}

/// A plain text prompt with no image or sampling overrides. Used to confirm a
/// model answers at all with the configured credential.
pub trait TextProvider: Send + Sync {
    fn prompt_text(&self, model: &str, prompt: &str) -> Result<String>;
}
