//! LLM adapter
//!
//! Optional provider-abstracted chat completion, consumed by ingestion
//! failure classification when the caller opts in and a provider credential
//! is present. The adapter is strictly best-effort: any transport, parse, or
//! schema failure returns a sentinel and the caller keeps the deterministic
//! rule-based result. LLM output never silently overrides the rule
//! classifier; results always record which method produced them.

mod classify;
mod client;
mod provider;


pub use classify::{
    ClassificationMethod, FailedJob, FailureDiagnosis, LlmClassifier, build_prompt,
};
pub use client::{ChatOutcome, LlmClient};
pub use provider::{Provider, ProviderKind, detect_provider};
