//! AI provider fallback chain: iterates an ordered list of model
//! configurations, classifying each failure as safety-refusal, retryable or
//! fatal, and stops at the first success. Holds no state between calls.

use serde::{Deserialize, Serialize};

use crate::error::{FallbackError, Task};

pub const MAX_SUBTITLE_ENTRIES: usize = 10_000;
pub const MAX_SUBTITLE_CHARS: usize = 1_000_000;

/// One entry of a fallback chain. Persisted verbatim inside a job's
/// `Transcribe` metadata, so it round-trips through the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model_name: String,
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleEntry {
    pub text: String,
    pub secondary_text: Option<String>,
}

#[derive(Debug, Clone)]
pub enum TaskParams {
    Generate { prompt: String },
    Translate { subtitles: Vec<SubtitleEntry> },
}

#[derive(Debug, Clone)]
pub struct AdapterSuccess {
    pub detected_language: Option<String>,
    pub subtitles: Vec<SubtitleEntry>,
}

/// What a provider adapter reports on failure; the fallback engine classifies
/// this, the adapter never classifies its own errors.
#[derive(Debug, Clone)]
pub struct AdapterError {
    pub message: String,
    pub http_status: Option<u16>,
    pub content_filter_code: bool,
}

pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> &str;

    fn generate(&self, config: &ModelConfig, prompt: &str) -> Result<AdapterSuccess, AdapterError>;

    fn translate(
        &self,
        config: &ModelConfig,
        subtitles: &[SubtitleEntry],
    ) -> Result<AdapterSuccess, AdapterError>;
}

/// Resolves a configured provider name to the adapter that talks to it. A
/// worker thread holds a `&dyn AdapterRegistry` only for the duration of a
/// single job; the registry itself is shared across workers behind an `Arc`.
pub trait AdapterRegistry: Send + Sync {
    fn resolve(&self, provider: &str) -> Option<&dyn ProviderAdapter>;
}

/// A registry with no adapters registered. Every `resolve` call fails, so any
/// chain routed through it falls straight to [`FallbackError::AllModelsFailed`]
/// (or `Provider` carrying "no adapter registered"). Useful for embedders and
/// tests that never submit a transcription job.
pub struct NoAdapters;

impl AdapterRegistry for NoAdapters {
    fn resolve(&self, _provider: &str) -> Option<&dyn ProviderAdapter> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct FallbackResult {
    pub detected_language: Option<String>,
    pub subtitles: Vec<SubtitleEntry>,
    pub provider: String,
    pub model_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    SafetyRefusal,
    Retryable,
    Fatal,
}

fn classify(error: &AdapterError) -> Classification {
    let lowered = error.message.to_ascii_lowercase();
    let safety_keywords = ["safety", "blocked", "policy", "content filter", "refused"];
    if safety_keywords.iter().any(|kw| lowered.contains(kw))
        || error.content_filter_code
        || (error.http_status == Some(400) && lowered.contains("candidate"))
    {
        return Classification::SafetyRefusal;
    }
    match error.http_status {
        Some(429) => Classification::Retryable,
        Some(status) if status >= 500 => Classification::Retryable,
        _ => Classification::Fatal,
    }
}

fn validate_translate_payload(subtitles: &[SubtitleEntry]) -> Result<(), FallbackError> {
    if subtitles.len() > MAX_SUBTITLE_ENTRIES {
        return Err(FallbackError::PayloadTooLarge(format!(
            "{} subtitle entries exceeds limit of {MAX_SUBTITLE_ENTRIES}",
            subtitles.len()
        )));
    }
    let total_chars: usize = subtitles
        .iter()
        .map(|s| s.text.chars().count() + s.secondary_text.as_deref().map_or(0, |t| t.chars().count()))
        .sum();
    if total_chars > MAX_SUBTITLE_CHARS {
        return Err(FallbackError::PayloadTooLarge(format!(
            "{total_chars} combined characters exceeds limit of {MAX_SUBTITLE_CHARS}"
        )));
    }
    Ok(())
}

/// Runs `task` against `chain` in order via `registry`, re-routing on
/// safety-refusal and retryable errors and propagating fatal ones
/// immediately. A validation failure (oversize translate payload) is never
/// re-routed.
pub fn process(
    task: Task,
    params: &TaskParams,
    chain: &[ModelConfig],
    registry: &dyn AdapterRegistry,
) -> Result<FallbackResult, FallbackError> {
    let enabled: Vec<&ModelConfig> = chain.iter().filter(|c| c.enabled).collect();
    if enabled.is_empty() {
        return Err(FallbackError::NoEnabledModels);
    }

    if let TaskParams::Translate { subtitles } = params {
        if task == Task::Translate {
            validate_translate_payload(subtitles)?;
        }
    }

    let mut last_error: Option<String> = None;

    for config in enabled {
        let adapter = match registry.resolve(&config.provider) {
            Some(adapter) => adapter,
            None => {
                last_error = Some(format!("no adapter registered for provider {}", config.provider));
                continue;
            }
        };

        let outcome = match (task, params) {
            (Task::Generate, TaskParams::Generate { prompt }) => adapter.generate(config, prompt),
            (Task::Translate, TaskParams::Translate { subtitles }) => {
                adapter.translate(config, subtitles)
            }
            _ => {
                return Err(FallbackError::UnsupportedTask {
                    provider: config.provider.clone(),
                    task,
                });
            }
        };

        match outcome {
            Ok(success) if !success.subtitles.is_empty() => {
                return Ok(FallbackResult {
                    detected_language: success.detected_language,
                    subtitles: success.subtitles,
                    provider: config.provider.clone(),
                    model_name: config.model_name.clone(),
                });
            }
            Ok(_) => {
                tracing::warn!(provider = %config.provider, "ai fallback: empty subtitle result treated as failure");
                last_error = Some(format!("{}: empty subtitle result", config.provider));
                continue;
            }
            Err(err) => match classify(&err) {
                Classification::SafetyRefusal => {
                    tracing::warn!(provider = %config.provider, "ai fallback: safety refusal, re-routing");
                    last_error = Some(err.message);
                    continue;
                }
                Classification::Retryable => {
                    tracing::warn!(provider = %config.provider, "ai fallback: retryable error, re-routing");
                    last_error = Some(err.message);
                    continue;
                }
                Classification::Fatal => {
                    return Err(FallbackError::Provider(err.message));
                }
            },
        }
    }

    Err(last_error
        .map(FallbackError::Provider)
        .unwrap_or(FallbackError::AllModelsFailed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct StubAdapter {
        name: String,
        generate_result: RefCell<Option<Result<AdapterSuccess, AdapterError>>>,
        translate_result: RefCell<Option<Result<AdapterSuccess, AdapterError>>>,
        calls: RefCell<usize>,
    }

    impl ProviderAdapter for StubAdapter {
        fn provider(&self) -> &str {
            &self.name
        }

        fn generate(&self, _config: &ModelConfig, _prompt: &str) -> Result<AdapterSuccess, AdapterError> {
            *self.calls.borrow_mut() += 1;
            self.generate_result.borrow_mut().take().expect("single call expected")
        }

        fn translate(
            &self,
            _config: &ModelConfig,
            _subtitles: &[SubtitleEntry],
        ) -> Result<AdapterSuccess, AdapterError> {
            *self.calls.borrow_mut() += 1;
            self.translate_result.borrow_mut().take().expect("single call expected")
        }
    }

    struct MapRegistry(HashMap<String, StubAdapter>);

    impl AdapterRegistry for MapRegistry {
        fn resolve(&self, provider: &str) -> Option<&dyn ProviderAdapter> {
            self.0.get(provider).map(|a| a as &dyn ProviderAdapter)
        }
    }

    fn config(provider: &str) -> ModelConfig {
        ModelConfig {
            provider: provider.to_string(),
            model_name: format!("{provider}-model"),
            enabled: true,
            endpoint: None,
            api_key: None,
        }
    }

    #[test]
    fn safety_refusal_routes_to_next_and_succeeds() {
        let mut map = HashMap::new();
        map.insert(
            "gemini".to_string(),
            StubAdapter {
                name: "gemini".to_string(),
                generate_result: RefCell::new(Some(Err(AdapterError {
                    message: "candidate was blocked due to safety".to_string(),
                    http_status: Some(400),
                    content_filter_code: false,
                }))),
                translate_result: RefCell::new(None),
                calls: RefCell::new(0),
            },
        );
        map.insert(
            "openai".to_string(),
            StubAdapter {
                name: "openai".to_string(),
                generate_result: RefCell::new(Some(Ok(AdapterSuccess {
                    detected_language: None,
                    subtitles: vec![SubtitleEntry {
                        text: "hi".to_string(),
                        secondary_text: None,
                    }],
                }))),
                translate_result: RefCell::new(None),
                calls: RefCell::new(0),
            },
        );
        let registry = MapRegistry(map);
        let chain = vec![config("gemini"), config("openai")];
        let result = process(
            Task::Generate,
            &TaskParams::Generate { prompt: "hello".to_string() },
            &chain,
            &registry,
        )
        .unwrap();
        assert_eq!(result.provider, "openai");
        assert_eq!(*registry.0["gemini"].calls.borrow(), 1);
    }

    #[test]
    fn fatal_error_stops_chain_immediately() {
        let mut map = HashMap::new();
        map.insert(
            "gemini".to_string(),
            StubAdapter {
                name: "gemini".to_string(),
                generate_result: RefCell::new(Some(Err(AdapterError {
                    message: "invalid api key".to_string(),
                    http_status: Some(401),
                    content_filter_code: false,
                }))),
                translate_result: RefCell::new(None),
                calls: RefCell::new(0),
            },
        );
        map.insert(
            "openai".to_string(),
            StubAdapter {
                name: "openai".to_string(),
                generate_result: RefCell::new(Some(Ok(AdapterSuccess {
                    detected_language: None,
                    subtitles: vec![],
                }))),
                translate_result: RefCell::new(None),
                calls: RefCell::new(0),
            },
        );
        let registry = MapRegistry(map);
        let chain = vec![config("gemini"), config("openai")];
        let err = process(
            Task::Generate,
            &TaskParams::Generate { prompt: "hello".to_string() },
            &chain,
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, FallbackError::Provider(_)));
        assert_eq!(*registry.0["openai"].calls.borrow(), 0);
    }

    #[test]
    fn translate_payload_over_entry_limit_is_fatal_validation() {
        let registry = MapRegistry(HashMap::new());
        let chain = vec![config("gemini")];
        let subtitles: Vec<SubtitleEntry> = (0..(MAX_SUBTITLE_ENTRIES + 1))
            .map(|i| SubtitleEntry {
                text: format!("line {i}"),
                secondary_text: None,
            })
            .collect();
        let err = process(
            Task::Translate,
            &TaskParams::Translate { subtitles },
            &chain,
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, FallbackError::PayloadTooLarge(_)));
    }

    #[test]
    fn empty_subtitles_on_success_is_treated_as_failure() {
        let mut map = HashMap::new();
        map.insert(
            "gemini".to_string(),
            StubAdapter {
                name: "gemini".to_string(),
                generate_result: RefCell::new(None),
                translate_result: RefCell::new(Some(Ok(AdapterSuccess {
                    detected_language: Some("en".to_string()),
                    subtitles: vec![],
                }))),
                calls: RefCell::new(0),
            },
        );
        let registry = MapRegistry(map);
        let chain = vec![config("gemini")];
        let err = process(
            Task::Translate,
            &TaskParams::Translate { subtitles: vec![] },
            &chain,
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, FallbackError::AllModelsFailed) || matches!(err, FallbackError::Provider(_)));
    }

    #[test]
    fn disabled_models_are_filtered_out() {
        let registry = MapRegistry(HashMap::new());
        let mut disabled = config("gemini");
        disabled.enabled = false;
        let err = process(
            Task::Generate,
            &TaskParams::Generate { prompt: "hi".to_string() },
            &[disabled],
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, FallbackError::NoEnabledModels));
    }
}
