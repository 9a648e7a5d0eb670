//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or an explicit path), then applies the `CHAT_STREAM_LOG_LEVEL` override.
//! `LLM_API_KEY` is only ever read from the environment.
//!
//! Chat defaults are addressed by flat string keys (`chat-model`,
//! `chat-temperature`, …) through [`KeySource`], so they can come from the
//! TOML `[chat]` table or any other key/value provider. Values are parsed
//! once into [`ChatDefaults`]; a malformed value is a config error.

use std::{
    collections::HashMap,
    env,
    fmt::Display,
    fs,
    path::Path,
    str::FromStr,
};

use serde::Deserialize;

use crate::chat::job::{SamplingParams, DEFAULT_MAX_CHARS_PER_RESPONSE};
use crate::error::AppError;
use crate::logger;

// ── Key-addressed chat settings ───────────────────────────────────────────────

pub const KEY_ROLE: &str = "chat-role";
pub const KEY_MODEL: &str = "chat-model";
pub const KEY_FREQUENCY_PENALTY: &str = "chat-frequency-penalty";
pub const KEY_MAX_TOKENS: &str = "chat-max-tokens";
pub const KEY_PRESENCE_PENALTY: &str = "chat-presence-penalty";
pub const KEY_TEMPERATURE: &str = "chat-temperature";
pub const KEY_TOP_P: &str = "chat-top-p";
pub const KEY_MAX_CHARS_PER_RESPONSE: &str = "chat-max-chars-per-response";
pub const KEY_HEADER: &str = "chat-header";

/// Resolves named setting keys to their string values.
pub trait KeySource {
    fn get(&self, key: &str) -> Option<String>;
}

impl KeySource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// The TOML `[chat]` table viewed as `chat-<key>` entries.
#[derive(Debug, Clone, Default)]
pub struct ChatTable(pub toml::Table);

impl KeySource for ChatTable {
    fn get(&self, key: &str) -> Option<String> {
        let name = key.strip_prefix("chat-")?;
        self.0.get(name).map(|v| match v {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Resolved defaults for every new completion job.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatDefaults {
    pub role: String,
    pub sampling: SamplingParams,
    pub max_chars_per_response: usize,
    /// Persona header for flattened history; `None` uses the built-in one.
    pub header: Option<String>,
}

impl ChatDefaults {
    /// Parse every chat key from `source`. Missing keys take built-in defaults.
    pub fn resolve(source: &impl KeySource) -> Result<Self, AppError> {
        Ok(Self {
            role: source.get(KEY_ROLE).unwrap_or_else(default_role),
            sampling: SamplingParams {
                model: source.get(KEY_MODEL).unwrap_or_else(default_model),
                max_tokens: parse_key(source, KEY_MAX_TOKENS, DEFAULT_MAX_TOKENS)?,
                temperature: parse_float(source, KEY_TEMPERATURE, DEFAULT_TEMPERATURE)?,
                top_p: parse_float(source, KEY_TOP_P, DEFAULT_TOP_P)?,
                frequency_penalty: parse_float(source, KEY_FREQUENCY_PENALTY, 0.0)?,
                presence_penalty: parse_float(source, KEY_PRESENCE_PENALTY, 0.0)?,
            },
            max_chars_per_response: parse_key(
                source,
                KEY_MAX_CHARS_PER_RESPONSE,
                DEFAULT_MAX_CHARS_PER_RESPONSE,
            )?,
            header: source.get(KEY_HEADER),
        })
    }
}

const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TOP_P: f64 = 1.0;

fn default_role() -> String { "user".to_string() }
fn default_model() -> String { "gpt-3.5-turbo".to_string() }

fn parse_key<T>(source: &impl KeySource, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    match source.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key}: invalid value '{raw}': {e}"))),
    }
}

fn parse_float(source: &impl KeySource, key: &str, default: f64) -> Result<f64, AppError> {
    let value: f64 = parse_key(source, key, default)?;
    if !value.is_finite() {
        return Err(AppError::Config(format!("{key}: value must be finite, got {value}")));
    }
    Ok(value)
}

// ── Public config ─────────────────────────────────────────────────────────────

/// OpenAI / OpenAI-compatible provider configuration.
/// Populated from `[llm.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Per-request HTTP timeout in seconds, streaming body included.
    pub timeout_seconds: u64,
}

/// LLM client configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (e.g. `"dummy"`, `"openai"`).
    /// Maps to `default` in `[llm]` TOML.
    pub provider: String,
    pub openai: OpenAiConfig,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_name: String,
    pub log_level: String,
    pub llm: LlmConfig,
    /// API key from `LLM_API_KEY` env var, `None` for keyless local models.
    /// Never sourced from TOML.
    pub llm_api_key: Option<String>,
    pub chat: ChatDefaults,
    /// Turns the console keeps for history flattening.
    pub history_cap: usize,
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    bot: RawBot,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    chat: toml::Table,
    #[serde(default)]
    history: RawHistory,
}

#[derive(Deserialize)]
struct RawBot {
    #[serde(default = "default_bot_name")]
    name: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

impl Default for RawBot {
    fn default() -> Self {
        Self { name: default_bot_name(), log_level: default_log_level() }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawHistory {
    #[serde(default = "default_history_cap")]
    cap: usize,
}

impl Default for RawHistory {
    fn default() -> Self {
        Self { cap: default_history_cap() }
    }
}

fn default_bot_name() -> String { "chat-stream".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_timeout_seconds() -> u64 { 60 }
fn default_history_cap() -> usize { 16 }

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from the given path, or `config/default.toml`, then apply env
/// overrides. Without an explicit path and without `config/default.toml`,
/// built-in defaults are used.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let log_level_override = env::var("CHAT_STREAM_LOG_LEVEL").ok();

    if let Some(path) = config_path {
        return load_from(Path::new(path), log_level_override.as_deref());
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(default_path, log_level_override.as_deref())
    } else {
        resolve(RawConfig::default(), log_level_override.as_deref())
    }
}

/// Internal loader. Accepts an explicit path and optional override.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, log_level_override: Option<&str>) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_str(&raw, log_level_override)
        .map_err(|e| match e {
            AppError::Config(msg) => AppError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
}

/// Parse config from TOML text.
pub fn parse_str(toml_text: &str, log_level_override: Option<&str>) -> Result<Config, AppError> {
    let parsed: RawConfig = toml::from_str(toml_text)
        .map_err(|e| AppError::Config(format!("parse error: {e}")))?;
    resolve(parsed, log_level_override)
}

fn resolve(raw: RawConfig, log_level_override: Option<&str>) -> Result<Config, AppError> {
    let chat = ChatDefaults::resolve(&ChatTable(raw.chat))?;
    let log_level = log_level_override.unwrap_or(&raw.bot.log_level).to_string();
    logger::parse_level(&log_level).map_err(|e| AppError::Config(format!("log_level: {e}")))?;

    Ok(Config {
        bot_name: raw.bot.name,
        log_level,
        llm: LlmConfig {
            provider: raw.llm.provider,
            openai: OpenAiConfig {
                api_base_url: raw.llm.openai.api_base_url,
                timeout_seconds: raw.llm.openai.timeout_seconds,
            },
        },
        llm_api_key: env::var("LLM_API_KEY").ok(),
        chat,
        history_cap: raw.history.cap,
    })
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests: dummy LLM, no API keys, no external calls.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            bot_name: "test".into(),
            log_level: "info".into(),
            llm: LlmConfig {
                provider: "dummy".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    timeout_seconds: 1,
                },
            },
            llm_api_key: None,
            chat: ChatDefaults {
                role: "user".into(),
                sampling: SamplingParams {
                    model: "test-model".into(),
                    max_tokens: 64,
                    temperature: 0.0,
                    top_p: 1.0,
                    frequency_penalty: 0.0,
                    presence_penalty: 0.0,
                },
                max_chars_per_response: DEFAULT_MAX_CHARS_PER_RESPONSE,
                header: None,
            },
            history_cap: 4,
        }
    }
}
