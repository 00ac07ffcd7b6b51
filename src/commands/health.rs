use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ApiState;
use crate::config::APP_VERSION;
use crate::error::IntakeResult;
use crate::services::llm::ProviderKind;

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub providers: Vec<ProviderKind>,
    pub workers: usize,
}

pub async fn check(State(state): State<ApiState>) -> IntakeResult<Json<Health>> {
    Ok(Json(Health {
        status: "ok",
        version: APP_VERSION,
        providers: state.router()?.available(),
        workers: state.config.processing.worker_count(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::commands::tests::TestApp;
    use crate::config::AppConfig;
    use crate::models::Role;
    use crate::services::llm::testing::ScriptedProvider;
    use crate::services::llm::ProviderKind;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;

    #[tokio::test]
    async fn reports_available_backends() {
        let openai = Arc::new(ScriptedProvider::answering(ProviderKind::OpenAi, "{}"));
        let app = TestApp::with(AppConfig::default(), Some(openai), Role::Viewer);
        let response = app
            .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["providers"], serde_json::json!(["openai"]));
    }
}
