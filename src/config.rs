use crate::openai::OpenAiSettings;
use crate::orchestrator::OrchestratorSettings;
use crate::retry::RetryConfig;
use crate::scheduler::MaintenanceSettings;
use crate::translator::is_valid_language_code;
use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for `QUEUE_RETENTION_DAYS` (a century).
const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Clone)]
pub struct Config {
    // OpenAI
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_api_url: String,
    pub openai_temperature: f32,
    pub translate_timeout_secs: u64,

    // Database
    pub database_url: String,

    // Languages
    pub source_language: String,
    pub target_languages: Vec<String>,

    // Queue
    pub queue_batch_size: usize,
    pub queue_reschedule_delay_secs: u64,
    pub queue_retention_days: u32,
    pub queue_lease_minutes: Option<u32>,
    pub maintenance_cron: String,

    // Posts
    pub author_id: i64,

    // Admin API
    pub api_key: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source_language = get("SOURCE_LANGUAGE").unwrap_or_else(|| "fr".to_string());
        if !is_valid_language_code(&source_language) {
            bail!("SOURCE_LANGUAGE '{}' is not a valid language code", source_language);
        }

        let target_languages = parse_language_list(
            &get("TARGET_LANGUAGES").unwrap_or_else(|| "en,ar,es".to_string()),
        )
        .context("Invalid TARGET_LANGUAGES")?;

        let queue_batch_size = parse_or(&get, "QUEUE_BATCH_SIZE", 5)?;
        if queue_batch_size == 0 {
            bail!("QUEUE_BATCH_SIZE must be at least 1");
        }

        let queue_retention_days = parse_or(&get, "QUEUE_RETENTION_DAYS", 7)?;
        if queue_retention_days > MAX_RETENTION_DAYS {
            bail!("QUEUE_RETENTION_DAYS must be at most {}", MAX_RETENTION_DAYS);
        }

        let queue_lease_minutes: Option<u32> = get("QUEUE_LEASE_MINUTES")
            .map(|v| v.trim().parse().context("Invalid QUEUE_LEASE_MINUTES"))
            .transpose()?;
        if queue_lease_minutes == Some(0) {
            bail!("QUEUE_LEASE_MINUTES must be at least 1");
        }

        Ok(Self {
            // OpenAI
            openai_api_key: get("OPENAI_API_KEY").context("OPENAI_API_KEY not set")?,
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            openai_api_url: get("OPENAI_API_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            openai_temperature: parse_or(&get, "OPENAI_TEMPERATURE", 0.3)?,
            translate_timeout_secs: parse_or(&get, "TRANSLATE_TIMEOUT_SECS", 60)?,

            // Database
            database_url: get("DATABASE_URL").context("DATABASE_URL not set")?,

            // Languages
            source_language,
            target_languages,

            // Queue
            queue_batch_size,
            queue_reschedule_delay_secs: parse_or(&get, "QUEUE_RESCHEDULE_DELAY_SECS", 60)?,
            queue_retention_days,
            queue_lease_minutes,
            maintenance_cron: get("MAINTENANCE_CRON").unwrap_or_else(|| "0 0 * * * *".to_string()),

            // Posts
            author_id: parse_or(&get, "AUTHOR_ID", 1)?,

            // Admin API
            api_key: get("API_KEY").filter(|k| !k.is_empty()),
            port: parse_or(&get, "PORT", 8080)?,
        })
    }

    /// Bound on a single HTTP attempt against the translate capability.
    pub fn translate_timeout(&self) -> Duration {
        Duration::from_secs(self.translate_timeout_secs)
    }

    pub fn openai_settings(&self) -> OpenAiSettings {
        OpenAiSettings {
            api_key: self.openai_api_key.clone(),
            api_url: self.openai_api_url.clone(),
            model: self.openai_model.clone(),
            temperature: self.openai_temperature,
            timeout: self.translate_timeout(),
            retry: RetryConfig::translation(),
        }
    }

    /// The orchestrator bounds a whole translate call, so its timeout leaves
    /// room for every retry attempt and the backoff between them.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            source_language: self.source_language.clone(),
            author_id: self.author_id,
            call_timeout: RetryConfig::translation().max_elapsed(self.translate_timeout()),
        }
    }

    pub fn maintenance_settings(&self) -> MaintenanceSettings {
        MaintenanceSettings {
            cron: self.maintenance_cron.clone(),
            retention_days: self.queue_retention_days,
            lease: self
                .queue_lease_minutes
                .map(|m| chrono::Duration::minutes(i64::from(m))),
        }
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: '{}'", key, raw)),
        None => Ok(default),
    }
}

/// Parse a comma separated list of language codes, dropping blanks and
/// duplicates while keeping order.
pub fn parse_language_list(raw: &str) -> Result<Vec<String>> {
    let mut languages: Vec<String> = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !is_valid_language_code(code) {
            bail!("'{}' is not a valid language code", code);
        }
        if !languages.iter().any(|l| l == code) {
            languages.push(code.to_string());
        }
    }
    if languages.is_empty() {
        bail!("at least one language is required");
    }
    Ok(languages)
}
