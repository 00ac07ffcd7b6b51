use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use super::auth::require_role;
use super::ApiState;
use crate::error::{IntakeError, IntakeResult};
use crate::models::{Identity, Role, Settings};
use crate::services::llm::{ProviderError, ProviderKind};

/// Absent fields stay unchanged. An empty key removes the stored key.
#[derive(Deserialize)]
pub struct SettingsPayload {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub anthropic_model: Option<String>,
}

#[derive(Deserialize)]
pub struct KeyTest {
    pub provider: String,
    pub api_key: Option<String>,
}

#[derive(Serialize)]
pub struct KeyTestResult {
    pub provider: ProviderKind,
    pub valid: bool,
    pub message: Option<String>,
}

pub async fn get_settings(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
) -> IntakeResult<Json<Settings>> {
    require_role(&identity, Role::Admin)?;
    Ok(Json(state.settings()?))
}

pub async fn save_settings(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<SettingsPayload>,
) -> IntakeResult<Json<Settings>> {
    require_role(&identity, Role::Admin)?;

    for (kind, key) in [
        (ProviderKind::OpenAi, &payload.openai_api_key),
        (ProviderKind::Anthropic, &payload.anthropic_api_key),
    ] {
        if let Some(key) = key {
            state.store_api_key(kind, Some(key.as_str()).filter(|k| !k.trim().is_empty()))?;
        }
    }
    for (kind, model) in [
        (ProviderKind::OpenAi, &payload.openai_model),
        (ProviderKind::Anthropic, &payload.anthropic_model),
    ] {
        if let Some(model) = model {
            state.store_model(kind, model)?;
        }
    }
    tracing::info!(user_id = %identity.user_id, "Settings saved");
    Ok(Json(state.settings()?))
}

/// `POST /api/settings/test-key`: a rejected key is a normal answer, only an
/// unreachable backend is an error.
pub async fn test_key(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Json(test): Json<KeyTest>,
) -> IntakeResult<Json<KeyTestResult>> {
    require_role(&identity, Role::Admin)?;
    let kind = ProviderKind::parse(&test.provider)
        .ok_or_else(|| IntakeError::Validation(format!("Unknown provider: {}", test.provider)))?;
    let provider = state.provider_for_key(kind, test.api_key.as_deref())?;

    match provider.verify().await {
        Ok(()) => Ok(Json(KeyTestResult {
            provider: kind,
            valid: true,
            message: None,
        })),
        Err(ProviderError::Authentication(message)) => Ok(Json(KeyTestResult {
            provider: kind,
            valid: false,
            message: Some(message),
        })),
        Err(err) => Err(IntakeError::Network(format!("{kind}: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::TestApp;
    use crate::config::AppConfig;
    use crate::services::llm::testing::ScriptedProvider;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn settings_are_admin_only() {
        let app = TestApp::new(Role::Member);
        let (status, _) = app.call("GET", "/api/settings", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn keys_and_models_can_be_saved() {
        let app = TestApp::new(Role::Admin);
        let (status, body) = app
            .call(
                "PUT",
                "/api/settings",
                Some(json!({"anthropic_api_key": "sk-ant-test", "openai_model": "gpt-4o-mini"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["anthropic_api_key_set"], true);
        assert_eq!(body["openai_model"], "gpt-4o-mini");
        assert!(body.get("anthropic_api_key").is_none());

        let (status, body) = app.call("PUT", "/api/settings", Some(json!({"anthropic_api_key": ""}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["anthropic_api_key_set"], false);
    }

    #[tokio::test]
    async fn configured_backend_can_be_tested() {
        let openai = Arc::new(ScriptedProvider::answering(ProviderKind::OpenAi, "{}"));
        let app = TestApp::with(AppConfig::default(), Some(openai), Role::Admin);

        let (status, body) = app
            .call("POST", "/api/settings/test-key", Some(json!({"provider": "openai"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert_eq!(body["provider"], "openai");

        let (status, body) = app
            .call("POST", "/api/settings/test-key", Some(json!({"provider": "anthropic"})))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "validation_error");

        let (status, _) = app
            .call("POST", "/api/settings/test-key", Some(json!({"provider": "mistral"})))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
