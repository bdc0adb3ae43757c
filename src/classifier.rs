// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Model-backed categorization
//!
//! Files the rule tables cannot decide are described to a local model. The
//! reply is collected from a token stream, cut short as soon as the
//! interesting fields have arrived, and parsed into an outcome. Every failure
//! on this path degrades to the rule-based fallback.

use futures_util::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::categories::CategorySet;
use crate::config::CategorizationConfig;
use crate::descriptor::FileDescriptor;
use crate::ollama::{GenerationEvent, TextGenerator, TokenStream};
use crate::outcome::{CategorizationOutcome, DecisionSource};
use crate::rules::{rule_based_fallback, RuleSet};
use crate::TaxisError;

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

const CATEGORY_FIELD: &str = "CATEGORY:";
const CONFIDENCE_FIELD: &str = "CONFIDENCE:";
const REASONING_FIELD: &str = "REASONING:";

/// Confidence used when the reply carries none we can read
const DEFAULT_CONFIDENCE: f64 = 0.5;
const ERROR_CONFIDENCE: f64 = 0.1;

/// Which occurrence of a repeated field is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPolicy {
    #[default]
    LastWins,
    FirstWins,
}

/// Build the completion prompt for one file
pub fn build_prompt(descriptor: &FileDescriptor, categories: &CategorySet) -> String {
    let categories_text = categories
        .iter()
        .map(|c| format!("{}: {} - {}", c.id, c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "<start_of_turn>user\nCategorize file: {}\n\nCategories: {}\n\nRespond format:\nCATEGORY: [id]\nCONFIDENCE: [0.0-1.0]<end_of_turn>",
        descriptor.name, categories_text
    )
}

/// Remove every `<...>` markup token
pub fn strip_tags(text: &str) -> String {
    TAG_PATTERN.replace_all(text, "").to_string()
}

#[derive(Debug, Default, PartialEq)]
struct ResponseFields {
    category: Option<String>,
    confidence: Option<String>,
    reasoning: Option<String>,
}

fn field_value<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(line[prefix.len()..].trim())
    } else {
        None
    }
}

fn store(slot: &mut Option<String>, value: &str, policy: FieldPolicy) {
    if slot.is_none() || policy == FieldPolicy::LastWins {
        *slot = Some(value.to_string());
    }
}

fn extract_fields(clean: &str, policy: FieldPolicy) -> ResponseFields {
    let mut fields = ResponseFields::default();

    for line in clean.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(value) = field_value(line, CATEGORY_FIELD) {
            store(&mut fields.category, value, policy);
        } else if let Some(value) = field_value(line, CONFIDENCE_FIELD) {
            store(&mut fields.confidence, value, policy);
        } else if let Some(value) = field_value(line, REASONING_FIELD) {
            store(&mut fields.reasoning, value, policy);
        }
    }

    fields
}

fn trim_token(value: &str) -> &str {
    value
        .trim()
        .trim_matches(|c: char| matches!(c, '[' | ']' | '"' | '\'' | '`' | '*' | '.'))
        .trim()
}

/// Leading dots are part of the number (`.5`); only a trailing one is punctuation
fn trim_number(value: &str) -> &str {
    let value = value
        .trim()
        .trim_matches(|c: char| matches!(c, '[' | ']' | '"' | '\'' | '`' | '*'))
        .trim();
    value.strip_suffix('.').unwrap_or(value)
}

fn parse_confidence(value: Option<&str>) -> f64 {
    let Some(value) = value else {
        return DEFAULT_CONFIDENCE;
    };
    match trim_number(value).parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => {
            debug!("Could not parse confidence '{}', using {}", value, DEFAULT_CONFIDENCE);
            DEFAULT_CONFIDENCE
        }
    }
}

/// Turn a model reply into an outcome; never fails
pub fn parse_response(
    response: &str,
    descriptor: &FileDescriptor,
    categories: &CategorySet,
    policy: FieldPolicy,
) -> CategorizationOutcome {
    let clean = strip_tags(response);
    let clean = clean.trim();
    let fields = extract_fields(clean, policy);
    let confidence = parse_confidence(fields.confidence.as_deref());

    let token = fields.category.as_deref().map(trim_token).unwrap_or_default();
    let matched = if token.is_empty() {
        None
    } else if let Some(category) = categories.find_by_id_ignore_case(token) {
        Some((category, 0.8))
    } else {
        categories
            .find_by_name_ignore_case(token)
            .map(|category| (category, 0.7))
    };

    match matched {
        Some((category, default_confidence)) => {
            let confidence = if confidence <= 0.0 {
                default_confidence
            } else {
                confidence.clamp(0.0, 1.0)
            };
            let reasoning = match fields.reasoning.as_deref() {
                Some(r) if !r.is_empty() => r.to_string(),
                _ => "AI-powered categorization".to_string(),
            };
            debug!(
                "Parsed model reply for {}: {} ({:.2})",
                descriptor.name, category.name, confidence
            );
            CategorizationOutcome::new(
                descriptor.clone(),
                category.clone(),
                confidence,
                reasoning,
                DecisionSource::Model,
            )
        }
        None => {
            warn!("No usable category in reply for {}: '{}'", descriptor.name, token);
            rule_based_fallback(descriptor, categories).with_reasoning(format!(
                "AI response unclear, used rule-based fallback. AI said: {}",
                clean
            ))
        }
    }
}

/// How a collected response ended
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEnd {
    Completed,
    EarlyStop,
    TimedOut,
    Closed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectedResponse {
    pub text: String,
    pub tokens: usize,
    pub end: StreamEnd,
}

fn has_trailing_fields(text: &str) -> bool {
    let upper = text.to_uppercase();
    upper.contains(CONFIDENCE_FIELD) || upper.contains(REASONING_FIELD)
}

/// Accumulate tokens until completion, early stop, failure or `limit`
pub async fn collect_response(
    mut stream: TokenStream,
    min_tokens: usize,
    limit: Duration,
) -> CollectedResponse {
    let deadline = tokio::time::Instant::now() + limit;
    let mut text = String::new();
    let mut tokens = 0;

    let end = loop {
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => break StreamEnd::TimedOut,
            Ok(None) => break StreamEnd::Closed,
            Ok(Some(GenerationEvent::Completed)) => break StreamEnd::Completed,
            Ok(Some(GenerationEvent::Failed(e))) => break StreamEnd::Failed(e),
            Ok(Some(GenerationEvent::Token(token))) => {
                text.push_str(&token);
                tokens += 1;
                if tokens > min_tokens && has_trailing_fields(&text) {
                    break StreamEnd::EarlyStop;
                }
            }
        }
    };

    CollectedResponse { text, tokens, end }
}

/// Outcome for a file whose categorization blew up entirely
pub fn error_outcome(
    descriptor: &FileDescriptor,
    categories: &CategorySet,
    message: &str,
) -> CategorizationOutcome {
    CategorizationOutcome::new(
        descriptor.clone(),
        categories.fallback().clone(),
        ERROR_CONFIDENCE,
        format!("Error during categorization: {}", message),
        DecisionSource::Error,
    )
}

/// Three-tier categorizer: rule tables, then the model, then the fallback
pub struct Categorizer {
    rules: RuleSet,
    categories: CategorySet,
    generator: Option<Arc<dyn TextGenerator>>,
    config: CategorizationConfig,
}

impl Categorizer {
    pub fn new(
        rules: RuleSet,
        categories: CategorySet,
        generator: Option<Arc<dyn TextGenerator>>,
        config: CategorizationConfig,
    ) -> Self {
        Self {
            rules,
            categories,
            generator,
            config,
        }
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    pub fn config(&self) -> &CategorizationConfig {
        &self.config
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub async fn categorize(&self, descriptor: &FileDescriptor) -> CategorizationOutcome {
        if let Some(outcome) = self.rules.quick_categorize(descriptor, &self.categories) {
            debug!("{} decided by {}", descriptor.name, outcome.source);
            return outcome;
        }

        let Some(generator) = &self.generator else {
            return rule_based_fallback(descriptor, &self.categories);
        };

        let prompt = build_prompt(descriptor, &self.categories);
        let stream = match generator.generate(&prompt, false).await {
            Ok(stream) => stream,
            Err(e) => return self.failed(descriptor, &e.to_string()),
        };

        let collected = collect_response(
            stream,
            self.config.early_parse_min_tokens,
            self.config.response_timeout(),
        )
        .await;

        info!(
            "Model reply for {} ({} tokens, {:?})",
            descriptor.name, collected.tokens, collected.end
        );

        match collected.end {
            StreamEnd::Completed | StreamEnd::EarlyStop => self.parse(&collected.text, descriptor),
            StreamEnd::Failed(e) => self.failed(descriptor, &TaxisError::Generation(e).to_string()),
            StreamEnd::TimedOut | StreamEnd::Closed => {
                if collected.text.to_uppercase().contains(CATEGORY_FIELD) {
                    self.parse(&collected.text, descriptor)
                } else {
                    warn!("No usable reply for {}", descriptor.name);
                    rule_based_fallback(descriptor, &self.categories).with_reasoning(format!(
                        "AI timeout or no response. Response: '{}'",
                        collected.text
                    ))
                }
            }
        }
    }

    fn parse(&self, text: &str, descriptor: &FileDescriptor) -> CategorizationOutcome {
        parse_response(text, descriptor, &self.categories, self.config.field_policy)
    }

    fn failed(&self, descriptor: &FileDescriptor, error: &str) -> CategorizationOutcome {
        warn!("Model categorization failed for {}: {}", descriptor.name, error);
        rule_based_fallback(descriptor, &self.categories).with_reasoning(format!(
            "AI categorization failed: {}. Used rule-based fallback.",
            error
        ))
    }

    /// Outcome for a file whose categorization blew up entirely
    pub fn error_outcome(&self, descriptor: &FileDescriptor, message: &str) -> CategorizationOutcome {
        error_outcome(descriptor, &self.categories, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::FALLBACK_CONFIDENCE;
    use crate::Result;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a fixed list of events and counts how many were pulled
    struct Scripted {
        events: Vec<GenerationEvent>,
        pulled: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn tokens(tokens: &[&str], complete: bool) -> Self {
            let mut events: Vec<GenerationEvent> = tokens
                .iter()
                .map(|t| GenerationEvent::Token(t.to_string()))
                .collect();
            if complete {
                events.push(GenerationEvent::Completed);
            }
            Self {
                events,
                pulled: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, prompt: &str, chat: bool) -> Result<TokenStream> {
            assert!(prompt.starts_with("<start_of_turn>user\n"));
            assert!(!chat);
            let pulled = self.pulled.clone();
            Ok(stream::iter(self.events.clone())
                .inspect(move |_| {
                    pulled.fetch_add(1, Ordering::SeqCst);
                })
                .boxed())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl TextGenerator for Unreachable {
        async fn generate(&self, _prompt: &str, _chat: bool) -> Result<TokenStream> {
            Err(TaxisError::EngineUnavailable("connection refused".to_string()))
        }
    }

    struct Silent;

    #[async_trait]
    impl TextGenerator for Silent {
        async fn generate(&self, _prompt: &str, _chat: bool) -> Result<TokenStream> {
            Ok(stream::pending().boxed())
        }
    }

    fn categorizer(generator: Option<Arc<dyn TextGenerator>>) -> Categorizer {
        let config = CategorizationConfig {
            response_timeout_secs: 1,
            ..CategorizationConfig::default()
        };
        Categorizer::new(RuleSet::default(), CategorySet::builtin(), generator, config)
    }

    fn undecided() -> FileDescriptor {
        FileDescriptor::detached("/tmp/xyz.dat")
    }

    fn parse(text: &str) -> CategorizationOutcome {
        parse_response(text, &undecided(), &CategorySet::builtin(), FieldPolicy::LastWins)
    }

    #[test]
    fn test_prompt_lists_every_category() {
        let prompt = build_prompt(&FileDescriptor::detached("/x/scan 01.heic"), &CategorySet::builtin());
        assert!(prompt.starts_with("<start_of_turn>user\nCategorize file: scan 01.heic\n\nCategories: receipts: Receipts - "));
        assert!(prompt.contains("\nto_delete: To Delete - Files that can be safely deleted\n"));
        assert!(prompt.ends_with("CATEGORY: [id]\nCONFIDENCE: [0.0-1.0]<end_of_turn>"));
    }

    #[test]
    fn test_parse_well_formed() {
        let outcome = parse("CATEGORY: work\nCONFIDENCE: 0.9\nREASONING: meeting notes");
        assert_eq!(outcome.category.id, "work");
        assert_eq!(outcome.confidence, 0.9);
        assert_eq!(outcome.reasoning, "meeting notes");
        assert_eq!(outcome.source, DecisionSource::Model);
        assert!(!outcome.confirmed);
    }

    #[test]
    fn test_parse_strips_tags_and_brackets() {
        let outcome = parse("<start_of_turn>model\n  category: [Receipts]\n confidence: 1.7 <end_of_turn>");
        assert_eq!(outcome.category.id, "receipts");
        assert_eq!(outcome.confidence, 1.0);
        assert_eq!(outcome.reasoning, "AI-powered categorization");
    }

    #[test]
    fn test_parse_unreadable_confidence() {
        assert_eq!(parse("CATEGORY: media\nCONFIDENCE: abc").confidence, 0.5);
        assert_eq!(parse("CATEGORY: media\nCONFIDENCE: NaN").confidence, 0.5);
        assert_eq!(parse("CATEGORY: media").confidence, 0.5);
    }

    #[test]
    fn test_parse_confidence_with_leading_dot() {
        assert_eq!(parse("CATEGORY: work\nCONFIDENCE: .5").confidence, 0.5);
        assert_eq!(parse("CATEGORY: work\nCONFIDENCE: [.25]").confidence, 0.25);
        assert_eq!(parse("CATEGORY: work\nCONFIDENCE: 0.8.").confidence, 0.8);

        let outcome = parse("CATEGORY: work\nCONFIDENCE: .5");
        let plan = crate::relocation::RelocationPlan::from_outcome(&outcome, std::path::Path::new("/sorted"), 0.7);
        assert!(!plan.selected);
    }

    #[test]
    fn test_parse_zero_confidence_defaults_by_match_kind() {
        assert_eq!(parse("CATEGORY: id_docs\nCONFIDENCE: 0").confidence, 0.8);
        assert_eq!(parse("CATEGORY: ID Documents\nCONFIDENCE: -2").confidence, 0.7);
    }

    #[test]
    fn test_parse_without_category_falls_back() {
        let outcome = parse("I think this is a work file.\nCONFIDENCE: 0.9");
        assert_eq!(outcome.category.id, "downloads");
        assert_eq!(outcome.confidence, FALLBACK_CONFIDENCE);
        assert!(outcome.reasoning.contains("rule-based fallback"));
        assert!(outcome.reasoning.ends_with("AI said: I think this is a work file.\nCONFIDENCE: 0.9"));

        let outcome = parse("CATEGORY: groceries");
        assert_eq!(outcome.source, DecisionSource::RuleFallback);
    }

    #[test]
    fn test_field_policy() {
        let text = "CATEGORY: work\nCATEGORY: media";
        let categories = CategorySet::builtin();
        let last = parse_response(text, &undecided(), &categories, FieldPolicy::LastWins);
        let first = parse_response(text, &undecided(), &categories, FieldPolicy::FirstWins);
        assert_eq!(last.category.id, "media");
        assert_eq!(first.category.id, "work");
    }

    #[tokio::test]
    async fn test_collect_stops_early() {
        let tokens: Vec<String> = (0..12).map(|_| "x".to_string()).collect();
        let mut script: Vec<&str> = tokens.iter().map(String::as_str).collect();
        script.push("\nCONFIDENCE:");
        script.extend(["0.9", "never", "read"]);
        let generator = Scripted::tokens(&script, true);
        let pulled = generator.pulled.clone();

        let stream = generator.generate("<start_of_turn>user\n", false).await.unwrap();
        let collected = collect_response(stream, 10, Duration::from_secs(5)).await;
        assert_eq!(collected.end, StreamEnd::EarlyStop);
        assert_eq!(collected.tokens, 13);
        assert_eq!(pulled.load(Ordering::SeqCst), 13);
    }

    #[tokio::test]
    async fn test_collect_needs_enough_tokens_before_early_stop() {
        let generator = Scripted::tokens(&["CATEGORY: work\n", "CONFIDENCE: 0.9"], true);
        let stream = generator.generate("<start_of_turn>user\n", false).await.unwrap();
        let collected = collect_response(stream, 10, Duration::from_secs(5)).await;
        assert_eq!(collected.end, StreamEnd::Completed);
        assert_eq!(collected.text, "CATEGORY: work\nCONFIDENCE: 0.9");
    }

    #[tokio::test]
    async fn test_collect_times_out() {
        let stream = Silent.generate("", false).await.unwrap();
        let collected = collect_response(stream, 10, Duration::from_millis(50)).await;
        assert_eq!(collected.end, StreamEnd::TimedOut);
        assert!(collected.text.is_empty());
    }

    #[tokio::test]
    async fn test_rules_decide_before_model() {
        let generator = Arc::new(Scripted::tokens(&["CATEGORY: work"], true));
        let pulled = generator.pulled.clone();
        let categorizer = categorizer(Some(generator));

        let outcome = categorizer.categorize(&FileDescriptor::detached("/a/report.pdf")).await;
        assert_eq!(outcome.category.id, "documents");
        assert_eq!(pulled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_model_decides_undecided_file() {
        let generator = Arc::new(Scripted::tokens(
            &["CATEGORY", ": ", "to_delete", "\n", "CONFIDENCE: 0.75"],
            true,
        ));
        let outcome = categorizer(Some(generator)).categorize(&undecided()).await;
        assert_eq!(outcome.category.id, "to_delete");
        assert_eq!(outcome.confidence, 0.75);
        assert_eq!(outcome.source, DecisionSource::Model);
    }

    #[tokio::test]
    async fn test_unreachable_model_falls_back() {
        let outcome = categorizer(Some(Arc::new(Unreachable))).categorize(&undecided()).await;
        assert_eq!(outcome.confidence, FALLBACK_CONFIDENCE);
        assert!(outcome
            .reasoning
            .starts_with("AI categorization failed: Model server not available: connection refused"));
    }

    #[tokio::test]
    async fn test_failed_stream_reports_generation_error() {
        let mut generator = Scripted::tokens(&["CATEGORY: wo"], false);
        generator.events.push(GenerationEvent::Failed("model crashed".to_string()));
        let outcome = categorizer(Some(Arc::new(generator))).categorize(&undecided()).await;
        assert_eq!(outcome.source, DecisionSource::RuleFallback);
        assert_eq!(
            outcome.reasoning,
            "AI categorization failed: Generation failed: model crashed. Used rule-based fallback."
        );
    }

    #[tokio::test]
    async fn test_silent_model_times_out_to_fallback() {
        let outcome = categorizer(Some(Arc::new(Silent))).categorize(&undecided()).await;
        assert_eq!(outcome.source, DecisionSource::RuleFallback);
        assert_eq!(outcome.reasoning, "AI timeout or no response. Response: ''");
    }

    #[tokio::test]
    async fn test_closed_stream_with_category_is_parsed() {
        let generator = Arc::new(Scripted::tokens(&["CATEGORY: personal"], false));
        let outcome = categorizer(Some(generator)).categorize(&undecided()).await;
        assert_eq!(outcome.category.id, "personal");
        assert_eq!(outcome.source, DecisionSource::Model);
    }

    #[tokio::test]
    async fn test_offline_and_idempotent() {
        let categorizer = categorizer(None);
        let descriptor = FileDescriptor::detached("/tmp/beach.heic");
        let first = categorizer.categorize(&descriptor).await;
        let second = categorizer.categorize(&descriptor).await;
        assert_eq!(first, second);
        assert_eq!(first.source, DecisionSource::RuleFallback);
    }

    #[test]
    fn test_error_outcome() {
        let outcome = error_outcome(&undecided(), &CategorySet::builtin(), "deadline exceeded");
        assert_eq!(outcome.confidence, 0.1);
        assert_eq!(outcome.category.id, "downloads");
        assert_eq!(outcome.reasoning, "Error during categorization: deadline exceeded");
        assert_eq!(outcome.source, DecisionSource::Error);
    }
}
