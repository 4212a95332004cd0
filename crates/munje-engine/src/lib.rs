pub mod availability;
pub mod gemini;
pub mod generator;
pub mod preprocess;
pub mod provider;

pub use availability::{check_models, ModelCheck, AVAILABILITY_PROMPT};
pub use gemini::{ConfigError, GeminiProvider, GeminiSettings};
pub use generator::{Generator, GeneratorConfig};
pub use preprocess::{
    compress_image, compress_or_original, CompressOptions, ImagePayload, PreprocessError,
};
pub use provider::{InvokeRequest, TextProvider, VisionProvider};

/// Renders an error and its causes on one line, skipping repeated entries.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{error_chain_text, truncate_text};

    #[test]
    fn error_chain_text_keeps_nested_contexts() {
        let err = anyhow::anyhow!("socket closed")
            .context("Gemini request failed (https://example.test)")
            .context("model attempt failed");
        let rendered = error_chain_text(&err, 400);
        assert_eq!(
            rendered,
            "model attempt failed | caused by: Gemini request failed (https://example.test) | caused by: socket closed"
        );
    }

    #[test]
    fn truncate_text_counts_characters_not_bytes() {
        assert_eq!(truncate_text("할당량초과", 3), "할당량…");
        assert_eq!(truncate_text("short", 10), "short");
    }
}
