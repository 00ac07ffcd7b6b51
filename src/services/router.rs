use std::sync::Arc;
use std::time::Duration;

use crate::config::AiConfig;
use crate::error::{IntakeError, IntakeResult};
use crate::services::llm::anthropic::AnthropicProvider;
use crate::services::llm::openai::OpenAiProvider;
use crate::services::llm::{extract_with, Extraction, LlmProvider, ProviderError, ProviderKind};
use crate::services::text_extraction::ExtractionMethod;

const OCR_COMPLEXITY_BONUS: u32 = 25;

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub complexity_threshold: u8,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub min_confidence: f64,
}

impl From<&AiConfig> for RouterSettings {
    fn from(config: &AiConfig) -> Self {
        RouterSettings {
            complexity_threshold: config.complexity_threshold,
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            min_confidence: config.min_confidence,
        }
    }
}

/// Plain-text API keys resolved from settings or environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RoutedExtraction {
    pub extraction: Extraction,
    pub complexity: u8,
    pub attempts: u32,
    pub fallback_used: bool,
}

/// 0..=100; one point per 50 characters, OCR text adds a fixed bonus.
pub fn complexity_score(text: &str, method: ExtractionMethod) -> u8 {
    let chars = text.chars().count() as u32;
    let mut score = (chars / 50).min(100);
    if method == ExtractionMethod::Ocr {
        score += OCR_COMPLEXITY_BONUS;
    }
    score.min(100) as u8
}

/// Delay before the given retry (1-based): `base * 2^(retry-1)`, capped.
pub fn backoff_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    base.saturating_mul(factor).min(max)
}

pub struct ExtractionRouter {
    openai: Option<Arc<dyn LlmProvider>>,
    anthropic: Option<Arc<dyn LlmProvider>>,
    settings: RouterSettings,
}

impl ExtractionRouter {
    pub fn new(
        openai: Option<Arc<dyn LlmProvider>>,
        anthropic: Option<Arc<dyn LlmProvider>>,
        settings: RouterSettings,
    ) -> Self {
        ExtractionRouter {
            openai,
            anthropic,
            settings,
        }
    }

    pub fn from_config(config: &AiConfig, keys: ProviderKeys) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;

        let openai = keys.openai.filter(|k| !k.trim().is_empty()).map(|key| {
            Arc::new(OpenAiProvider::new(
                client.clone(),
                key,
                config.openai.model.clone(),
                config.openai.base_url.clone(),
            )) as Arc<dyn LlmProvider>
        });
        let anthropic = keys.anthropic.filter(|k| !k.trim().is_empty()).map(|key| {
            Arc::new(AnthropicProvider::new(
                client.clone(),
                key,
                config.anthropic.model.clone(),
                config.anthropic.base_url.clone(),
            )) as Arc<dyn LlmProvider>
        });

        Ok(Self::new(openai, anthropic, RouterSettings::from(config)))
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<Arc<dyn LlmProvider>> {
        match kind {
            ProviderKind::OpenAi => self.openai.clone(),
            ProviderKind::Anthropic => self.anthropic.clone(),
        }
    }

    pub fn available(&self) -> Vec<ProviderKind> {
        [ProviderKind::OpenAi, ProviderKind::Anthropic]
            .into_iter()
            .filter(|kind| self.provider(*kind).is_some())
            .collect()
    }

    /// Primary and secondary backend for a complexity score.
    pub fn order(&self, complexity: u8) -> (ProviderKind, ProviderKind) {
        if complexity >= self.settings.complexity_threshold {
            (ProviderKind::Anthropic, ProviderKind::OpenAi)
        } else {
            (ProviderKind::OpenAi, ProviderKind::Anthropic)
        }
    }

    pub async fn extract(&self, text: &str, method: ExtractionMethod) -> IntakeResult<RoutedExtraction> {
        let complexity = complexity_score(text, method);
        let (primary_kind, secondary_kind) = self.order(complexity);
        let primary = self.provider(primary_kind);
        let secondary = self.provider(secondary_kind);

        if primary.is_none() && secondary.is_none() {
            return Err(IntakeError::Authentication(
                "no extraction backend has an API key".to_string(),
            ));
        }

        let mut failures: Vec<(ProviderKind, ProviderError)> = Vec::new();
        let mut attempts = 0;

        if let Some(primary) = &primary {
            tracing::debug!(provider = %primary_kind, complexity, "Routing extraction");
            match self.run_backend(primary.as_ref(), text, &mut attempts).await {
                Ok(extraction) => {
                    let extraction = self
                        .consult_if_unsure(extraction, secondary.as_deref(), text, &mut attempts)
                        .await;
                    let fallback_used = extraction.provider != primary_kind;
                    return Ok(RoutedExtraction {
                        extraction,
                        complexity,
                        attempts,
                        fallback_used,
                    });
                }
                Err(err) => failures.push((primary_kind, err)),
            }
        } else {
            failures.push((primary_kind, ProviderError::NotConfigured(primary_kind)));
        }

        if let Some(secondary) = &secondary {
            tracing::warn!(
                from = %primary_kind,
                to = %secondary_kind,
                "Primary backend exhausted, falling back"
            );
            match self.run_backend(secondary.as_ref(), text, &mut attempts).await {
                Ok(extraction) => {
                    return Ok(RoutedExtraction {
                        extraction,
                        complexity,
                        attempts,
                        fallback_used: true,
                    })
                }
                Err(err) => failures.push((secondary_kind, err)),
            }
        } else {
            failures.push((secondary_kind, ProviderError::NotConfigured(secondary_kind)));
        }

        let summary = failures
            .iter()
            .map(|(kind, err)| format!("{kind}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(IntakeError::ProcessingFailed(format!(
            "all extraction backends failed ({summary})"
        )))
    }

    async fn run_backend(
        &self,
        provider: &dyn LlmProvider,
        text: &str,
        attempts: &mut u32,
    ) -> Result<Extraction, ProviderError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            *attempts += 1;
            match extract_with(provider, text).await {
                Ok(extraction) => return Ok(extraction),
                Err(err) if err.is_transient() && attempt < self.settings.max_attempts => {
                    let delay =
                        backoff_delay(attempt, self.settings.backoff_base, self.settings.backoff_max);
                    tracing::warn!(
                        provider = %provider.kind(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Extraction attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::warn!(provider = %provider.kind(), attempt, error = %err, "Extraction backend gave up");
                    return Err(err);
                }
            }
        }
    }

    /// A low-confidence answer is checked against the other backend; the
    /// more confident one wins.
    async fn consult_if_unsure(
        &self,
        extraction: Extraction,
        secondary: Option<&dyn LlmProvider>,
        text: &str,
        attempts: &mut u32,
    ) -> Extraction {
        if extraction.confidence() >= self.settings.min_confidence {
            return extraction;
        }
        let Some(secondary) = secondary else {
            return extraction;
        };

        tracing::info!(
            provider = %extraction.provider,
            confidence = extraction.confidence(),
            consult = %secondary.kind(),
            "Low confidence, consulting second backend"
        );
        match self.run_backend(secondary, text, attempts).await {
            Ok(other) if other.confidence() > extraction.confidence() => other,
            Ok(_) => extraction,
            Err(err) => {
                tracing::warn!(provider = %secondary.kind(), error = %err, "Consultation failed");
                extraction
            }
        }
    }
}
