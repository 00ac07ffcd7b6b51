//! Bearer token authentication. The resolved [`Identity`] is stored in the
//! request extensions for handlers.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::ApiState;
use crate::error::{IntakeError, IntakeResult};
use crate::models::{Identity, Role};

pub async fn require_auth(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    match authenticate(&state, req) {
        Ok(req) => next.run(req).await,
        Err(err) => err.into_response(),
    }
}

fn authenticate(state: &ApiState, mut req: Request) -> IntakeResult<Request> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| IntakeError::Authentication("Bearer token required".to_string()))?
        .to_string();

    let identity = state
        .db()?
        .identity_for_token(&token)?
        .ok_or_else(|| IntakeError::Authentication("Unknown API token".to_string()))?;
    tracing::debug!(user_id = %identity.user_id, role = identity.role.as_str(), "Authenticated");
    req.extensions_mut().insert(identity);
    Ok(req)
}

pub fn require_role(identity: &Identity, needed: Role) -> IntakeResult<()> {
    if identity.role >= needed {
        Ok(())
    } else {
        Err(IntakeError::Forbidden(format!(
            "{} role required, you are {}",
            needed.as_str(),
            identity.role.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(role: Role) -> Identity {
        Identity {
            user_id: "u1".into(),
            email: "u1@example.com".into(),
            org_id: None,
            role,
        }
    }

    #[test]
    fn roles_are_ordered() {
        assert!(require_role(&identity(Role::Admin), Role::Member).is_ok());
        assert!(require_role(&identity(Role::Member), Role::Member).is_ok());
        let err = require_role(&identity(Role::Viewer), Role::Member).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Forbidden);
    }
}
