use crate::error::VidharaError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_llm_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    String::new()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_data_dir() -> String {
    "./vidharini.data".into()
}
fn default_web_host() -> String {
    "127.0.0.1".into()
}
fn default_web_port() -> u16 {
    3000
}
fn default_status_backend() -> StatusBackend {
    StatusBackend::Sqlite
}
fn default_task_ttl_secs() -> u64 {
    3600
}
fn default_status_sweep_interval_secs() -> u64 {
    300
}
fn default_rag_top_k() -> usize {
    3
}
fn default_ocr_model() -> String {
    "mistral-small-latest".into()
}
fn default_transcription_poll_interval_secs() -> u64 {
    2
}
fn default_transcription_max_attempts() -> u32 {
    30
}
fn default_queue_poll_interval_ms() -> u64 {
    500
}
fn default_client_poll_interval_secs() -> u64 {
    2
}
fn default_client_poll_max_attempts() -> u32 {
    30
}

/// Backend holding task status records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBackend {
    Sqlite,
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub llm_base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Replaces the built-in legal assistant instructions when set.
    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_web_host")]
    pub web_host: String,
    #[serde(default = "default_web_port")]
    pub web_port: u16,

    #[serde(default = "default_status_backend")]
    pub status_backend: StatusBackend,
    #[serde(default = "default_task_ttl_secs")]
    pub task_ttl_secs: u64,
    #[serde(default = "default_status_sweep_interval_secs")]
    pub status_sweep_interval_secs: u64,
    #[serde(default = "default_queue_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,

    #[serde(default)]
    pub mistral_api_key: Option<String>,
    #[serde(default)]
    pub ocr_base_url: Option<String>,
    #[serde(default = "default_ocr_model")]
    pub ocr_model: String,

    #[serde(default)]
    pub replicate_api_token: Option<String>,
    #[serde(default)]
    pub replicate_base_url: Option<String>,
    #[serde(default)]
    pub replicate_model_version: Option<String>,
    #[serde(default = "default_transcription_poll_interval_secs")]
    pub transcription_poll_interval_secs: u64,
    #[serde(default = "default_transcription_max_attempts")]
    pub transcription_max_attempts: u32,

    #[serde(default)]
    pub embedding_provider: Option<String>,
    #[serde(default)]
    pub embedding_api_key: Option<String>,
    #[serde(default)]
    pub embedding_base_url: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub embedding_dim: Option<usize>,
    #[serde(default = "default_rag_top_k")]
    pub rag_top_k: usize,

    #[serde(default = "default_client_poll_interval_secs")]
    pub client_poll_interval_secs: u64,
    #[serde(default = "default_client_poll_max_attempts")]
    pub client_poll_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            llm_provider: default_llm_provider(),
            api_key: String::new(),
            model: default_model(),
            llm_base_url: None,
            temperature: default_temperature(),
            max_tokens: None,
            system_prompt: None,
            data_dir: default_data_dir(),
            web_host: default_web_host(),
            web_port: default_web_port(),
            status_backend: default_status_backend(),
            task_ttl_secs: default_task_ttl_secs(),
            status_sweep_interval_secs: default_status_sweep_interval_secs(),
            queue_poll_interval_ms: default_queue_poll_interval_ms(),
            mistral_api_key: None,
            ocr_base_url: None,
            ocr_model: default_ocr_model(),
            replicate_api_token: None,
            replicate_base_url: None,
            replicate_model_version: None,
            transcription_poll_interval_secs: default_transcription_poll_interval_secs(),
            transcription_max_attempts: default_transcription_max_attempts(),
            embedding_provider: None,
            embedding_api_key: None,
            embedding_base_url: None,
            embedding_model: None,
            embedding_dim: None,
            rag_top_k: default_rag_top_k(),
            client_poll_interval_secs: default_client_poll_interval_secs(),
            client_poll_max_attempts: default_client_poll_max_attempts(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn env_non_empty(name: &str) -> Option<String> {
    non_empty(std::env::var(name).ok())
}

impl Config {
    pub fn data_root_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// Directory holding the database.
    pub fn runtime_data_dir(&self) -> String {
        self.data_root_dir()
            .join("runtime")
            .to_string_lossy()
            .to_string()
    }

    pub fn task_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.task_ttl_secs)
    }

    pub fn has_llm_credentials(&self) -> bool {
        self.llm_provider == "ollama" || !self.api_key.trim().is_empty()
    }

    pub fn resolve_config_path() -> Result<Option<PathBuf>, VidharaError> {
        if let Ok(custom) = std::env::var("VIDHARINI_CONFIG") {
            if std::path::Path::new(&custom).exists() {
                return Ok(Some(PathBuf::from(custom)));
            }
            return Err(VidharaError::Config(format!(
                "VIDHARINI_CONFIG points to non-existent file: {custom}"
            )));
        }

        for candidate in ["./vidharini.config.yaml", "./vidharini.config.yml"] {
            if std::path::Path::new(candidate).exists() {
                return Ok(Some(PathBuf::from(candidate)));
            }
        }
        Ok(None)
    }

    /// Loads the YAML config, or built-in defaults when no file exists.
    /// Provider keys missing from the file are taken from the environment.
    pub fn load() -> Result<Self, VidharaError> {
        let mut config = match Self::resolve_config_path()? {
            Some(path) => {
                let path_str = path.to_string_lossy().to_string();
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| VidharaError::Config(format!("Failed to read {path_str}: {e}")))?;
                Self::from_yaml(&content)
                    .map_err(|e| VidharaError::Config(format!("Failed to parse {path_str}: {e}")))?
            }
            None => Config::default(),
        };
        config.post_deserialize()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(content)
    }

    /// Normalises values and fills gaps from the environment.
    pub fn post_deserialize(&mut self) -> Result<(), VidharaError> {
        self.llm_provider = self.llm_provider.trim().to_lowercase();
        if !matches!(self.llm_provider.as_str(), "openai" | "ollama") {
            return Err(VidharaError::Config(format!(
                "Unsupported llm_provider: {} (expected openai or ollama)",
                self.llm_provider
            )));
        }

        if self.model.trim().is_empty() {
            self.model = match self.llm_provider.as_str() {
                "ollama" => "llama3.2".into(),
                _ => "gpt-4o-mini".into(),
            };
        }
        if self.api_key.trim().is_empty() && self.llm_provider == "openai" {
            self.api_key = env_non_empty("OPENAI_API_KEY").unwrap_or_default();
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(VidharaError::Config(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }

        self.llm_base_url = non_empty(self.llm_base_url.take());
        self.system_prompt = non_empty(self.system_prompt.take());
        self.mistral_api_key =
            non_empty(self.mistral_api_key.take()).or_else(|| env_non_empty("MISTRAL_API_KEY"));
        self.ocr_base_url = non_empty(self.ocr_base_url.take());
        self.replicate_api_token = non_empty(self.replicate_api_token.take())
            .or_else(|| env_non_empty("REPLICATE_API_TOKEN"));
        self.replicate_base_url = non_empty(self.replicate_base_url.take());
        self.replicate_model_version = non_empty(self.replicate_model_version.take());
        self.embedding_provider =
            non_empty(self.embedding_provider.take()).map(|p| p.to_lowercase());
        self.embedding_api_key = non_empty(self.embedding_api_key.take());
        self.embedding_base_url = non_empty(self.embedding_base_url.take());
        self.embedding_model = non_empty(self.embedding_model.take());

        if self.data_dir.trim().is_empty() {
            self.data_dir = default_data_dir();
        }
        if self.web_host.trim().is_empty() {
            self.web_host = default_web_host();
        }
        if self.ocr_model.trim().is_empty() {
            self.ocr_model = default_ocr_model();
        }
        if self.task_ttl_secs == 0 {
            return Err(VidharaError::Config("task_ttl_secs must be > 0".into()));
        }
        if self.status_sweep_interval_secs == 0 {
            self.status_sweep_interval_secs = default_status_sweep_interval_secs();
        }
        if self.queue_poll_interval_ms == 0 {
            self.queue_poll_interval_ms = default_queue_poll_interval_ms();
        }
        if self.rag_top_k == 0 {
            self.rag_top_k = default_rag_top_k();
        }
        if self.transcription_max_attempts == 0 {
            self.transcription_max_attempts = default_transcription_max_attempts();
        }
        if self.client_poll_max_attempts == 0 {
            self.client_poll_max_attempts = default_client_poll_max_attempts();
        }
        Ok(())
    }

    /// Save config as YAML to the given path.
    pub fn save_yaml(&self, path: &str) -> Result<(), VidharaError> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| VidharaError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        api_key: "sk-test".into(),
        model: "gpt-4o-mini".into(),
        data_dir: std::env::temp_dir()
            .join(format!("vidharini_cfg_{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string(),
        ..Config::default()
    }
}
