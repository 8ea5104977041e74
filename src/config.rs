use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::{fs, path::Path};

pub const DEFAULT_CONFIG_PATH: &str = ".config/reconcile.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    Anthropic,
    Gemini,
    /// Any OpenAI-compatible chat completions endpoint (hosted or a local Ollama).
    Openai,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default)]
    pub backend: LlmBackend,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_anthropic")]
    pub anthropic: EndpointConfig,
    #[serde(default = "default_gemini")]
    pub gemini: EndpointConfig,
    #[serde(default = "default_openai")]
    pub openai: EndpointConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: LlmBackend::default(),
            request_timeout_secs: default_request_timeout(),
            max_tokens: default_max_tokens(),
            anthropic: default_anthropic(),
            gemini: default_gemini(),
            openai: default_openai(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_anthropic() -> EndpointConfig {
    EndpointConfig {
        base_url: "https://api.anthropic.com/v1".to_string(),
        model: "claude-sonnet-4-20250514".to_string(),
    }
}

fn default_gemini() -> EndpointConfig {
    EndpointConfig {
        base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        model: "gemini-2.5-flash".to_string(),
    }
}

fn default_openai() -> EndpointConfig {
    EndpointConfig {
        base_url: "http://localhost:11434/v1".to_string(),
        model: "qwen2.5vl".to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgrest,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            table: default_table(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

fn default_table() -> String {
    "contractor_completed_projects".to_string()
}

fn default_sqlite_path() -> String {
    "projects.db".to_string()
}

/// Tunables for conversion, validation and batch pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub render_dpi: f32,
    pub max_page_pixels: u64,
    pub target_page_pixels: u64,
    pub max_image_bytes: usize,
    pub max_resize_rounds: u32,
    pub download_timeout_secs: u64,
    pub project_delay_secs: u64,
    pub contract_tolerance_sar: f64,
    pub usd_to_sar: f64,
    pub invoice_total_tolerance: f64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            render_dpi: 100.0,
            max_page_pixels: 4_000_000,
            target_page_pixels: 3_000_000,
            max_image_bytes: 4_718_592, // 4.5 MiB
            max_resize_rounds: 6,
            download_timeout_secs: 30,
            project_delay_secs: 60,
            contract_tolerance_sar: 1000.0,
            usd_to_sar: 3.75,
            invoice_total_tolerance: 0.01,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `path` when it exists, otherwise fall back to built-in defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Read a required secret from the environment.
pub fn require_env(names: &[&str]) -> Result<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
        .ok_or_else(|| PipelineError::Config(format!("{} env var required", names.join(" or "))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.llm.backend, LlmBackend::Anthropic);
        assert_eq!(cfg.store.backend, StoreBackend::Postgrest);
        assert_eq!(cfg.pipeline.project_delay_secs, 60);
        assert_eq!(cfg.pipeline.max_image_bytes, 4_718_592);
        assert_eq!(cfg.store.table, "contractor_completed_projects");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [llm]
            backend = "gemini"

            [llm.openai]
            base_url = "http://127.0.0.1:8080/v1"
            model = "llava"

            [store]
            backend = "sqlite"
            sqlite_path = "/tmp/p.db"

            [pipeline]
            project_delay_secs = 0
            usd_to_sar = 3.76
            "#,
        )
        .unwrap();
        assert_eq!(cfg.llm.backend, LlmBackend::Gemini);
        assert_eq!(cfg.llm.openai.model, "llava");
        assert_eq!(cfg.llm.gemini.model, "gemini-2.5-flash");
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
        assert_eq!(cfg.store.sqlite_path, "/tmp/p.db");
        assert_eq!(cfg.pipeline.project_delay_secs, 0);
        assert_eq!(cfg.pipeline.usd_to_sar, 3.76);
        assert_eq!(cfg.pipeline.render_dpi, 100.0);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = toml::from_str::<Config>("[llm]\nbackend = \"bard\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn missing_secret_names_every_candidate() {
        let err = require_env(&["ZR_TEST_UNSET_A", "ZR_TEST_UNSET_B"]).unwrap_err();
        assert!(err.to_string().contains("ZR_TEST_UNSET_A or ZR_TEST_UNSET_B"));
    }
}
