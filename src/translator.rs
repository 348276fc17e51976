//! The translate capability boundary and language-code helpers.

use crate::error::TranslateError;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

/// External text-translation service.
///
/// Implementations must preserve embedded markup and only translate
/// human-readable text. Failures are reported as
/// [`TranslateError::CapabilityFailure`]; callers bound each call with a
/// timeout of their own.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, TranslateError>;

    /// Name used in logs.
    fn provider_name(&self) -> &str;
}

static LANGUAGE_CODE: OnceLock<Regex> = OnceLock::new();

/// ISO 639 code with optional subtags, e.g. `es`, `pt-br`, `zh-Hans`.
pub fn is_valid_language_code(code: &str) -> bool {
    LANGUAGE_CODE
        .get_or_init(|| {
            Regex::new(r"^[a-z]{2,3}(-[A-Za-z0-9]{2,8})*$").expect("language code pattern is valid")
        })
        .is_match(code)
}

/// English display name for prompts; unknown codes are used as-is.
pub fn language_name(code: &str) -> &str {
    let base = code.split('-').next().unwrap_or(code);
    match base {
        "ar" => "Arabic",
        "de" => "German",
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "it" => "Italian",
        "ja" => "Japanese",
        "nl" => "Dutch",
        "pl" => "Polish",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "tr" => "Turkish",
        "zh" => "Chinese",
        _ => code,
    }
}
