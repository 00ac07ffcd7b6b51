//! HTTP surface. Everything under `/api` requires a bearer token.

pub mod auth;
pub mod dashboard;
pub mod error;
pub mod health;
pub mod invoices;
pub mod jobs;
pub mod reports;
pub mod settings;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::export::ExportFile;
use crate::services::state::AppState;

pub type ApiState = Arc<AppState>;

pub fn api_router(state: ApiState) -> Router {
    let body_limit = state.config.limits.max_request_bytes();

    let api = Router::new()
        .route("/upload", post(jobs::upload))
        .route("/process/:job_id", post(jobs::process))
        .route("/status/:job_id", get(jobs::status))
        .route("/results/:job_id", get(jobs::results))
        .route("/download/:job_id/:format", get(jobs::download))
        .route("/export", get(jobs::export))
        .route("/invoices", get(invoices::list))
        .route("/invoices/:id", get(invoices::detail).patch(invoices::update_field))
        .route("/invoices/:id/overrides", delete(invoices::clear_overrides))
        .route("/invoices/:id/overrides/:field", delete(invoices::clear_override))
        .route("/invoices/:id/approve", post(invoices::approve))
        .route("/invoices/:id/reject", post(invoices::reject))
        .route("/invoices/:id/reprocess", post(invoices::reprocess))
        .route("/duplicates/:id/review", post(invoices::review_duplicate))
        .route("/dashboard", get(dashboard::stats))
        .route("/settings", get(settings::get_settings).put(settings::save_settings))
        .route("/settings/test-key", post(settings::test_key))
        .route("/reports", get(reports::list).post(reports::create))
        .route("/reports/:id", delete(reports::remove))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(health::check))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: ApiState) -> anyhow::Result<()> {
    let bind = state.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Bind {bind}"))?;
    tracing::info!(bind = %bind, "HTTP server listening");
    axum::serve(listener, api_router(state))
        .await
        .context("HTTP server")?;
    Ok(())
}

/// Download response with content type and attachment file name.
pub(crate) fn file_response(file: ExportFile) -> Response {
    (
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.file_name),
            ),
        ],
        file.bytes,
    )
        .into_response()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::Role;
    use crate::services::llm::testing::ScriptedProvider;
    use crate::services::state::tests::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    pub(crate) struct TestApp {
        pub state: ApiState,
        pub token: String,
    }

    impl TestApp {
        pub(crate) fn new(role: Role) -> Self {
            Self::with(AppConfig::default(), None, role)
        }

        pub(crate) fn with(config: AppConfig, openai: Option<Arc<ScriptedProvider>>, role: Role) -> Self {
            let state = Arc::new(test_state(config, openai));
            let token = {
                let db = state.db().unwrap();
                let user = db.create_user("owner@example.com", None, role).unwrap();
                db.issue_token(&user.id, Some("test")).unwrap()
            };
            TestApp { state, token }
        }

        pub(crate) fn token_for(&self, email: &str, role: Role) -> String {
            let db = self.state.db().unwrap();
            let user = db.create_user(email, None, role).unwrap();
            db.issue_token(&user.id, None).unwrap()
        }

        pub(crate) fn user_id(&self) -> String {
            let db = self.state.db().unwrap();
            db.identity_for_token(&self.token).unwrap().unwrap().user_id
        }

        pub(crate) async fn call(&self, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
            self.call_as(&self.token, method, uri, body).await
        }

        pub(crate) async fn call_as(
            &self,
            token: &str,
            method: &str,
            uri: &str,
            body: Option<serde_json::Value>,
        ) -> (StatusCode, serde_json::Value) {
            let mut builder = Request::builder()
                .method(method)
                .uri(uri)
                .header("Authorization", format!("Bearer {token}"));
            let body = match body {
                Some(json) => {
                    builder = builder.header("Content-Type", "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            let response = self.send(builder.body(body).unwrap()).await;
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
            (status, value)
        }

        pub(crate) async fn send(&self, request: Request<Body>) -> Response {
            api_router(Arc::clone(&self.state)).oneshot(request).await.unwrap()
        }
    }

    #[tokio::test]
    async fn api_requires_a_known_token() {
        let app = TestApp::new(Role::Viewer);
        let response = app
            .send(Request::builder().uri("/api/invoices").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let (status, body) = app.call_as("nope", "GET", "/api/invoices", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "authentication_error");

        let (status, _) = app.call("GET", "/api/invoices", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = TestApp::new(Role::Viewer);
        let response = app
            .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
