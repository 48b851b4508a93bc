//! Wiring of configured backends and tools into a stage [`Toolkit`].

use crate::config::{BackendConfig, Config, ConfigError, Provider};
use async_openai::config::OpenAIConfig;
use chalkboard_core::llm_client::{LLMClient, OpenAICompatibleClient};
use chalkboard_core::prompts::Prompts;
use chalkboard_core::tools::{AudioSynthesizer, CommandSynthesizer, FfmpegAssembler, ManimRenderer};
use chalkboard_core::{SessionPaths, StructuredGenerator, Toolkit};
use std::sync::Arc;
use tracing::info;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// The OpenAI-compatible endpoint for `provider`.
pub fn api_base(provider: Provider, config: &Config) -> String {
    match provider {
        Provider::OpenAI => OPENAI_API_BASE.to_string(),
        Provider::Gemini => GEMINI_API_BASE.to_string(),
        Provider::Ollama => config.ollama_base_url.clone(),
    }
}

fn api_key(provider: Provider, config: &Config) -> Result<String, ConfigError> {
    match provider {
        Provider::OpenAI => config.openai_api_key.clone().ok_or_else(|| {
            ConfigError::MissingVar("OPENAI_API_KEY must be set for 'openai' provider".to_string())
        }),
        Provider::Gemini => config.gemini_api_key.clone().ok_or_else(|| {
            ConfigError::MissingVar("GEMINI_API_KEY must be set for 'gemini' provider".to_string())
        }),
        // Ollama ignores the key but the client always sends one.
        Provider::Ollama => Ok("ollama".to_string()),
    }
}

/// Builds the text backend for one generation role.
pub fn client_for(role: &BackendConfig, config: &Config) -> Result<Arc<dyn LLMClient>, ConfigError> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(api_key(role.provider, config)?)
        .with_api_base(api_base(role.provider, config));
    let client = OpenAICompatibleClient::new(openai_config, role.model.clone(), role.temperature);
    info!(
        provider = ?role.provider,
        model = client.model(),
        temperature = role.temperature,
        "Text backend configured"
    );
    Ok(Arc::new(client))
}

/// Assembles everything the stages need for one session.
pub fn toolkit(config: &Config, paths: SessionPaths, prompts: Prompts) -> Result<Toolkit, ConfigError> {
    let synthesizer = config
        .tts_bin
        .as_ref()
        .map(|bin| Arc::new(CommandSynthesizer::new(bin.clone())) as Arc<dyn AudioSynthesizer>);
    if synthesizer.is_none() {
        info!("Speech synthesis disabled, videos will be silent");
    }

    let generator = StructuredGenerator::new(client_for(&config.general, config)?);
    Ok(Toolkit {
        codegen: generator.with_backend(client_for(&config.codegen, config)?),
        code_review: generator.with_backend(client_for(&config.code_review, config)?),
        generator,
        prompts: Arc::new(prompts),
        renderer: Arc::new(ManimRenderer::new(
            config.manim_bin.clone(),
            config.ffmpeg_bin.clone(),
            paths.media.clone(),
        )),
        synthesizer,
        assembler: Arc::new(FfmpegAssembler::new(config.ffmpeg_bin.clone())),
        tts_lang: config.tts_lang.clone(),
        paths,
    })
}
