use anyhow::Result;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::config::AppConfig;
use crate::db::Database;
use crate::error::{IntakeError, IntakeResult};
use crate::models::Settings;
use crate::services::crypto::CryptoService;
use crate::services::llm::{LlmProvider, ProviderKind};
use crate::services::notifier::Notifier;
use crate::services::router::{ExtractionRouter, ProviderKeys};
use crate::services::validation::Validator;

const OPENAI_MODEL_KEY: &str = "openai_model";
const ANTHROPIC_MODEL_KEY: &str = "anthropic_model";

/// Shared service state handed to HTTP handlers, the batch runner, the
/// report scheduler and the inbox watcher.
pub struct AppState {
    pub config: Arc<AppConfig>,
    db: Arc<Mutex<Database>>,
    router: RwLock<Arc<ExtractionRouter>>,
    validator: Validator,
    notifier: Notifier,
    crypto: Option<CryptoService>,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database) -> Result<Self> {
        let crypto = CryptoService::from_env(&config.security.secret_env);
        let keys = resolve_keys(&config, &db, crypto.as_ref());
        let router = ExtractionRouter::from_config(&effective_ai(&config, &db)?, keys)?;
        Self::with_router(config, db, router, crypto)
    }

    pub fn with_router(
        config: AppConfig,
        db: Database,
        router: ExtractionRouter,
        crypto: Option<CryptoService>,
    ) -> Result<Self> {
        let validator = Validator::new(&config.processing)?;
        let notifier = Notifier::new(config.notifications.clone());
        Ok(AppState {
            config: Arc::new(config),
            db: Arc::new(Mutex::new(db)),
            router: RwLock::new(Arc::new(router)),
            validator,
            notifier,
            crypto,
        })
    }

    pub fn db(&self) -> IntakeResult<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| IntakeError::lock_poisoned("database"))
    }

    pub fn shared_db(&self) -> &Arc<Mutex<Database>> {
        &self.db
    }

    pub fn router(&self) -> IntakeResult<Arc<ExtractionRouter>> {
        self.router
            .read()
            .map(|router| Arc::clone(&router))
            .map_err(|_| IntakeError::lock_poisoned("router"))
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn settings(&self) -> IntakeResult<Settings> {
        let router = self.router()?;
        let db = self.db()?;
        let ai = effective_ai(&self.config, &db)?;
        Ok(Settings {
            openai_api_key_set: router.provider(ProviderKind::OpenAi).is_some(),
            anthropic_api_key_set: router.provider(ProviderKind::Anthropic).is_some(),
            openai_model: ai.openai.model,
            anthropic_model: ai.anthropic.model,
            complexity_threshold: ai.complexity_threshold,
            strict_validation: self.config.processing.strict_validation,
            workers: self.config.processing.worker_count(),
        })
    }

    /// Stores an encrypted provider key (or removes it with `None`) and
    /// rebuilds the router.
    pub fn store_api_key(&self, kind: ProviderKind, key: Option<&str>) -> IntakeResult<()> {
        {
            let db = self.db()?;
            match key.map(str::trim).filter(|k| !k.is_empty()) {
                Some(key) => {
                    let crypto = self.crypto.as_ref().ok_or_else(|| {
                        IntakeError::Validation(format!(
                            "Set {} to store API keys",
                            self.config.security.secret_env
                        ))
                    })?;
                    db.set_setting(kind.setting_key(), &crypto.encrypt(key)?)?;
                }
                None => db.delete_setting(kind.setting_key())?,
            }
        }
        tracing::info!(provider = %kind, stored = key.is_some(), "Provider key updated");
        self.reload_router()
    }

    pub fn store_model(&self, kind: ProviderKind, model: &str) -> IntakeResult<()> {
        let key = match kind {
            ProviderKind::OpenAi => OPENAI_MODEL_KEY,
            ProviderKind::Anthropic => ANTHROPIC_MODEL_KEY,
        };
        self.db()?.set_setting(key, model.trim())?;
        self.reload_router()
    }

    /// Backend for a key test: a fresh client for `key`, or the configured
    /// backend when no key is given.
    pub fn provider_for_key(&self, kind: ProviderKind, key: Option<&str>) -> IntakeResult<Arc<dyn LlmProvider>> {
        let provider = match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => {
                let ai = {
                    let db = self.db()?;
                    effective_ai(&self.config, &db)?
                };
                let keys = match kind {
                    ProviderKind::OpenAi => ProviderKeys {
                        openai: Some(key.to_string()),
                        anthropic: None,
                    },
                    ProviderKind::Anthropic => ProviderKeys {
                        openai: None,
                        anthropic: Some(key.to_string()),
                    },
                };
                ExtractionRouter::from_config(&ai, keys)?.provider(kind)
            }
            None => self.router()?.provider(kind),
        };
        provider.ok_or_else(|| IntakeError::Validation(format!("No API key configured for {kind}")))
    }

    pub fn reload_router(&self) -> IntakeResult<()> {
        let router = {
            let db = self.db()?;
            let keys = resolve_keys(&self.config, &db, self.crypto.as_ref());
            ExtractionRouter::from_config(&effective_ai(&self.config, &db)?, keys)?
        };
        let mut guard = self
            .router
            .write()
            .map_err(|_| IntakeError::lock_poisoned("router"))?;
        *guard = Arc::new(router);
        Ok(())
    }
}

fn effective_ai(config: &AppConfig, db: &Database) -> IntakeResult<crate::config::AiConfig> {
    let mut ai = config.ai.clone();
    if let Some(model) = db.get_setting(OPENAI_MODEL_KEY)?.filter(|m| !m.is_empty()) {
        ai.openai.model = model;
    }
    if let Some(model) = db.get_setting(ANTHROPIC_MODEL_KEY)?.filter(|m| !m.is_empty()) {
        ai.anthropic.model = model;
    }
    Ok(ai)
}

/// A stored, encrypted key wins over the environment variable.
fn resolve_keys(config: &AppConfig, db: &Database, crypto: Option<&CryptoService>) -> ProviderKeys {
    let resolve = |kind: ProviderKind, env_var: &str| {
        let stored = db.get_setting(kind.setting_key()).ok().flatten();
        if let (Some(payload), Some(crypto)) = (stored.as_deref(), crypto) {
            match crypto.decrypt(payload) {
                Ok(key) => return Some(key),
                Err(err) => tracing::warn!(provider = %kind, error = %err, "Stored key unreadable"),
            }
        }
        std::env::var(env_var).ok().filter(|k| !k.trim().is_empty())
    };
    ProviderKeys {
        openai: resolve(ProviderKind::OpenAi, &config.ai.openai.api_key_env),
        anthropic: resolve(ProviderKind::Anthropic, &config.ai.anthropic.api_key_env),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::llm::testing::ScriptedProvider;
    use crate::services::router::RouterSettings;
    use std::time::Duration;

    pub(crate) fn router_with(
        openai: Option<Arc<ScriptedProvider>>,
        anthropic: Option<Arc<ScriptedProvider>>,
    ) -> ExtractionRouter {
        ExtractionRouter::new(
            openai.map(|p| p as Arc<dyn LlmProvider>),
            anthropic.map(|p| p as Arc<dyn LlmProvider>),
            RouterSettings {
                complexity_threshold: 40,
                max_attempts: 2,
                backoff_base: Duration::from_millis(1),
                backoff_max: Duration::from_millis(2),
                min_confidence: 0.5,
            },
        )
    }

    pub(crate) fn test_state(mut config: AppConfig, openai: Option<Arc<ScriptedProvider>>) -> AppState {
        config.ai.openai.api_key_env = "INVOICE_INTAKE_TEST_UNSET_OPENAI_KEY".to_string();
        config.ai.anthropic.api_key_env = "INVOICE_INTAKE_TEST_UNSET_ANTHROPIC_KEY".to_string();
        let crypto = CryptoService::new("test-secret-value").ok();
        AppState::with_router(
            config,
            Database::open_in_memory().unwrap(),
            router_with(openai, None),
            crypto,
        )
        .unwrap()
    }

    #[test]
    fn stored_keys_are_encrypted_and_enable_the_backend() {
        let state = test_state(AppConfig::default(), None);
        assert!(!state.settings().unwrap().anthropic_api_key_set);

        state.store_api_key(ProviderKind::Anthropic, Some("sk-ant-test")).unwrap();
        let stored = state.db().unwrap().get_setting("anthropic_api_key").unwrap().unwrap();
        assert!(stored.starts_with("enc:"));
        assert!(state.settings().unwrap().anthropic_api_key_set);

        state.store_api_key(ProviderKind::Anthropic, None).unwrap();
        assert!(state.db().unwrap().get_setting("anthropic_api_key").unwrap().is_none());
        assert!(!state.settings().unwrap().anthropic_api_key_set);
    }

    #[test]
    fn environment_key_backs_up_a_missing_stored_key() {
        let mut config = AppConfig::default();
        config.ai.openai.api_key_env = "INVOICE_INTAKE_TEST_FALLBACK_OPENAI_KEY".to_string();
        config.ai.anthropic.api_key_env = "INVOICE_INTAKE_TEST_FALLBACK_ANTHROPIC_KEY".to_string();
        std::env::set_var("INVOICE_INTAKE_TEST_FALLBACK_OPENAI_KEY", "sk-from-env");
        let db = Database::open_in_memory().unwrap();

        let keys = resolve_keys(&config, &db, None);
        assert_eq!(keys.openai.as_deref(), Some("sk-from-env"));
        assert!(keys.anthropic.is_none());
    }

    #[test]
    fn model_override_shows_in_settings() {
        let state = test_state(AppConfig::default(), None);
        state.store_model(ProviderKind::OpenAi, "gpt-4o-mini").unwrap();
        assert_eq!(state.settings().unwrap().openai_model, "gpt-4o-mini");
    }

    #[test]
    fn key_under_test_gets_a_fresh_client_with_the_stored_model() {
        let state = test_state(AppConfig::default(), None);
        assert!(state.provider_for_key(ProviderKind::Anthropic, None).is_err());

        state.store_model(ProviderKind::Anthropic, "claude-test-model").unwrap();
        let provider = state
            .provider_for_key(ProviderKind::Anthropic, Some(" sk-ant-test "))
            .unwrap();
        assert_eq!(provider.kind(), ProviderKind::Anthropic);
        assert_eq!(provider.model(), "claude-test-model");
    }
}
