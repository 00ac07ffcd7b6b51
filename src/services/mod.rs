pub mod batch;
pub mod crypto;
pub mod datev;
pub mod duplicate;
pub mod export;
pub mod intake;
pub mod llm;
pub mod notifier;
pub mod overrides;
pub mod plausibility;
pub mod processor;
pub mod quota;
pub mod reports;
pub mod router;
pub mod state;
pub mod text_extraction;
pub mod validation;
pub mod watcher;
