use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Text-generation providers. All of them are reached through their
/// OpenAI-compatible chat endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenAI,
    Gemini,
}

impl Provider {
    fn parse(var: &str, value: &str) -> Result<Self, ConfigError> {
        match value.to_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::OpenAI),
            "gemini" => Ok(Provider::Gemini),
            other => Err(ConfigError::InvalidValue(
                var.to_string(),
                format!("'{other}' is not one of ollama, openai, gemini"),
            )),
        }
    }

    /// The model used when none is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Ollama => "gemma3:4b",
            Provider::OpenAI => "gpt-4o-mini",
            Provider::Gemini => "gemini-2.5-flash",
        }
    }
}

/// Provider, model and sampling temperature for one generation role.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendConfig {
    pub provider: Provider,
    pub model: String,
    pub temperature: f32,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub sessions_dir: PathBuf,
    /// Planning, teaching, storyboarding, review and audio timing.
    pub general: BackendConfig,
    pub codegen: BackendConfig,
    pub code_review: BackendConfig,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub ollama_base_url: String,
    pub manim_bin: String,
    pub ffmpeg_bin: String,
    /// `None` when `TTS_BIN` is set to an empty string.
    pub tts_bin: Option<String>,
    pub tts_lang: String,
    pub prompts_path: Option<PathBuf>,
    pub record_steps: bool,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Reads the provider/model pair for a role, inheriting from `fallback`
/// when the role has no provider of its own.
fn backend_from_env(
    provider_var: &str,
    model_var: &str,
    fallback: Option<&BackendConfig>,
    temperature: f32,
) -> Result<BackendConfig, ConfigError> {
    let provider = match (std::env::var(provider_var), fallback) {
        (Ok(value), _) => Provider::parse(provider_var, &value)?,
        (Err(_), Some(fallback)) => fallback.provider,
        (Err(_), None) => Provider::Ollama,
    };
    let model = match (std::env::var(model_var), fallback) {
        (Ok(model), _) => model,
        (Err(_), Some(fallback)) if fallback.provider == provider => fallback.model.clone(),
        _ => provider.default_model().to_string(),
    };
    Ok(BackendConfig {
        provider,
        model,
        temperature,
    })
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue(
            var.to_string(),
            format!("'{other}' is not a boolean"),
        )),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let sessions_dir = PathBuf::from(var_or("SESSIONS_DIR", "sessions"));

        let general = backend_from_env("LLM_PROVIDER", "LLM_MODEL", None, 0.2)?;
        let codegen = backend_from_env("CODEGEN_PROVIDER", "CODEGEN_MODEL", Some(&general), 0.0)?;
        let code_review =
            backend_from_env("CODE_REVIEW_PROVIDER", "CODE_REVIEW_MODEL", Some(&general), 0.2)?;

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();
        let ollama_base_url = var_or("OLLAMA_BASE_URL", "http://localhost:11434/v1");

        let manim_bin = var_or("MANIM_BIN", "manim");
        let ffmpeg_bin = var_or("FFMPEG_BIN", "ffmpeg");
        let tts_bin = Some(var_or("TTS_BIN", "gtts-cli")).filter(|bin| !bin.is_empty());
        let tts_lang = var_or("TTS_LANG", "en");

        let prompts_path = std::env::var("PROMPTS_PATH").ok().map(PathBuf::from);
        let record_steps = parse_bool("RECORD_STEPS", &var_or("RECORD_STEPS", "false"))?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        for role in [&general, &codegen, &code_review] {
            match role.provider {
                Provider::OpenAI if openai_api_key.is_none() => {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
                Provider::Gemini if gemini_api_key.is_none() => {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                    ));
                }
                _ => {}
            }
        }

        Ok(Self {
            sessions_dir,
            general,
            codegen,
            code_review,
            openai_api_key,
            gemini_api_key,
            ollama_base_url,
            manim_bin,
            ffmpeg_bin,
            tts_bin,
            tts_lang,
            prompts_path,
            record_steps,
            log_level,
        })
    }
}
