use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::models::ExtractedInvoiceData;

pub mod anthropic;
pub mod openai;
pub mod parse;
pub mod prompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            _ => None,
        }
    }

    pub fn setting_key(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai_api_key",
            ProviderKind::Anthropic => "anthropic_api_key",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("{0} is not configured")]
    NotConfigured(ProviderKind),

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network: {0}")]
    Network(String),

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("request rejected {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Transient failures are worth another attempt on the same backend.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Network(_)
                | ProviderError::Server { .. }
                | ProviderError::MalformedResponse(_)
        )
    }

    pub fn from_status(status: u16, body: String) -> Self {
        let body: String = body.chars().take(500).collect();
        match status {
            401 | 403 => ProviderError::Authentication(body),
            429 => ProviderError::RateLimited(body),
            500..=599 => ProviderError::Server { status, body },
            _ => ProviderError::Rejected { status, body },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::MalformedResponse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// One chat round trip: system prompt plus a single user message.
    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError>;

    /// Cheap authenticated call used by the settings key test.
    async fn verify(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub data: ExtractedInvoiceData,
    pub raw_json: String,
    pub provider: ProviderKind,
    pub model: String,
}

impl Extraction {
    pub fn confidence(&self) -> f64 {
        self.data.confidence.unwrap_or(0.0)
    }
}

/// Runs the extraction prompt against one backend. A schema violation gets
/// one repair request before it counts as a malformed response.
pub async fn extract_with(provider: &dyn LlmProvider, text: &str) -> Result<Extraction, ProviderError> {
    let system = prompt::system_prompt();
    let user = prompt::user_prompt(text);

    let mut raw = provider.complete(&system, &user).await?;
    let mut value = parse::parse_response(&raw)?;

    if let Err(reason) = parse::check_schema(&value) {
        tracing::warn!(provider = %provider.kind(), reason = %reason, "Schema mismatch, requesting repair");
        raw = provider.complete(&system, &prompt::repair_prompt(&raw)).await?;
        value = parse::parse_response(&raw)?;
        parse::check_schema(&value).map_err(ProviderError::MalformedResponse)?;
    }

    let data = parse::into_extracted(&value);
    Ok(Extraction {
        data,
        raw_json: value.to_string(),
        provider: provider.kind(),
        model: provider.model().to_string(),
    })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ProviderError::from_status(429, String::new()).is_transient());
        assert!(ProviderError::from_status(503, String::new()).is_transient());
        assert!(!ProviderError::from_status(401, String::new()).is_transient());
        assert!(!ProviderError::from_status(400, String::new()).is_transient());
        assert!(!ProviderError::NotConfigured(ProviderKind::OpenAi).is_transient());
    }

    #[tokio::test]
    async fn schema_violation_triggers_one_repair() {
        let provider = ScriptedProvider::new(
            ProviderKind::OpenAi,
            vec![
                Ok(r#"{"invoice_number": "RE-1"}"#.to_string()),
                Ok(invoice_json("RE-1", 119.0, 0.9)),
            ],
        );
        let extraction = extract_with(&provider, "Rechnung RE-1").await.unwrap();
        assert_eq!(provider.call_count(), 2);
        assert_eq!(extraction.data.gross_amount, Some(119.0));
        assert_eq!(extraction.provider, ProviderKind::OpenAi);
    }

    #[tokio::test]
    async fn repeated_schema_violation_is_malformed() {
        let provider = ScriptedProvider::answering(ProviderKind::Anthropic, r#"{"foo": 1}"#);
        let err = extract_with(&provider, "Rechnung").await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
        assert_eq!(provider.call_count(), 2);
    }
}
