//! Port trait for the generative text service.

use simcrm_types::error::TextGenError;

/// A service that turns a prompt into generated text.
///
/// The engine always asks for JSON and parses/validates the result itself;
/// implementations just move bytes.
pub trait TextGenerator: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
    ) -> impl std::future::Future<Output = Result<String, TextGenError>> + Send;
}
