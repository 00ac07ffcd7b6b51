use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const MIN_WORKERS: usize = 2;
pub const MAX_WORKERS: usize = 8;

pub fn default_log_filter() -> &'static str {
    "invoice_intake=info,tower_http=info"
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub limits: LimitsConfig,
    pub processing: ProcessingConfig,
    pub ai: AiConfig,
    pub datev: DatevConfig,
    pub quota: QuotaConfig,
    pub notifications: NotificationConfig,
    pub security: SecurityConfig,
    pub watcher: WatcherConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub upload_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0:8000".to_string(),
            upload_dir: PathBuf::from("data/uploads"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("data/invoices.sqlite"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_file_bytes: u64,
    pub max_files_per_upload: usize,
    pub allowed_extensions: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_file_bytes: 20 * 1024 * 1024,
            max_files_per_upload: 50,
            allowed_extensions: ["pdf", "png", "jpg", "jpeg", "tif", "tiff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl LimitsConfig {
    /// Upper bound for one multipart request body.
    pub fn max_request_bytes(&self) -> usize {
        let total = self
            .max_file_bytes
            .saturating_mul(self.max_files_per_upload as u64)
            .saturating_add(1024 * 1024);
        usize::try_from(total).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub workers: usize,
    pub strict_validation: bool,
    pub required_fields: Vec<String>,
    pub gross_tolerance: f64,
    pub min_text_chars: usize,
    pub ocr_language: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig {
            workers: 4,
            strict_validation: false,
            required_fields: ["invoice_number", "invoice_date", "supplier_name", "gross_amount"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            gross_tolerance: 0.02,
            min_text_chars: 50,
            ocr_language: "deu".to_string(),
        }
    }
}

impl ProcessingConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.clamp(MIN_WORKERS, MAX_WORKERS)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub complexity_threshold: u8,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub min_confidence: f64,
    pub request_timeout_secs: u64,
    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
}

impl Default for AiConfig {
    fn default() -> Self {
        AiConfig {
            complexity_threshold: 40,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            min_confidence: 0.5,
            request_timeout_secs: 60,
            openai: ProviderConfig {
                model: "gpt-4o-2024-08-06".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
            },
            anthropic: ProviderConfig {
                model: "claude-sonnet-4-5-20250929".to_string(),
                base_url: "https://api.anthropic.com/v1".to_string(),
                api_key_env: "ANTHROPIC_API_KEY".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProviderConfig {
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatevConfig {
    pub sachkonto: String,
    pub gegenkonto: String,
    pub kostenstelle_1: String,
    pub kostenstelle_2: String,
    pub currency: String,
}

impl Default for DatevConfig {
    fn default() -> Self {
        DatevConfig {
            sachkonto: "4900".to_string(),
            gegenkonto: "1200".to_string(),
            kostenstelle_1: String::new(),
            kostenstelle_2: String::new(),
            currency: "EUR".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Invoices per owner and calendar month; 0 disables the check.
    pub monthly_invoices: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        QuotaConfig {
            monthly_invoices: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password_env: String,
    pub from_address: String,
    pub to_addresses: Vec<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        NotificationConfig {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: 587,
            username: String::new(),
            password_env: "SMTP_PASSWORD".to_string(),
            from_address: String::new(),
            to_addresses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub secret_env: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            secret_env: "INTAKE_SECRET".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub inbox_dir: Option<PathBuf>,
    pub owner_email: Option<String>,
    pub poll_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            inbox_dir: None,
            owner_email: None,
            poll_ms: 700,
        }
    }
}

impl AppConfig {
    /// Loads the TOML file if present, falls back to defaults otherwise, then
    /// applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Read config {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            AppConfig::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Parse config")
    }

    fn apply_env(&mut self) {
        if let Ok(bind) = std::env::var("INTAKE_BIND") {
            self.server.bind = bind;
        }
        if let Ok(path) = std::env::var("INTAKE_DATABASE") {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("INTAKE_UPLOAD_DIR") {
            self.server.upload_dir = PathBuf::from(dir);
        }
        if let Some(workers) = std::env::var("INTAKE_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.processing.workers = workers;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [ai]
            complexity_threshold = 55

            [processing]
            strict_validation = true
            "#,
        )
        .unwrap();
        assert_eq!(config.ai.complexity_threshold, 55);
        assert_eq!(config.ai.max_attempts, 3);
        assert!(config.processing.strict_validation);
        assert_eq!(config.processing.required_fields.len(), 4);
        assert_eq!(config.datev.sachkonto, "4900");
    }

    #[test]
    fn worker_count_is_clamped() {
        let mut processing = ProcessingConfig::default();
        processing.workers = 0;
        assert_eq!(processing.worker_count(), MIN_WORKERS);
        processing.workers = 64;
        assert_eq!(processing.worker_count(), MAX_WORKERS);
        processing.workers = 5;
        assert_eq!(processing.worker_count(), 5);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.limits.max_file_bytes, 20 * 1024 * 1024);
    }
}
