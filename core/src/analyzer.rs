//! Stage 1: document structure analysis. An LLM extracts weighted sections
//! from the reference text; if the model cannot produce a usable analysis
//! within the retry policy, a heuristic split of the raw text stands in so
//! the run can continue.

use std::sync::Arc;
use std::time::Duration;

use deckgen_common::{ReferenceDocument, Section, StructureAnalysis};
use deckgen_providers::{extract_json, ChatModel, ChatRequest, ProviderError};
use serde::Deserialize;
use thiserror::Error;

use crate::error::PipelineError;
use crate::failure::{
    bounded_call, call_with_retry, Attempted, FailureLog, OperationKind, RetryPolicy,
};
use crate::prompt;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("reference text is empty")]
    EmptyInput,
}

#[derive(Deserialize)]
struct SectionSchema {
    title: String,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default = "default_weight")]
    weight: u8,
}

fn default_weight() -> u8 {
    5
}

#[derive(Deserialize)]
struct AnalysisSchema {
    sections: Vec<SectionSchema>,
    #[serde(default)]
    suggested_slides: Option<usize>,
}

pub struct DocumentAnalyzer {
    chat: Arc<dyn ChatModel>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl DocumentAnalyzer {
    pub fn new(chat: Arc<dyn ChatModel>, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            chat,
            policy,
            call_timeout,
        }
    }

    /// Analyze the reference text into weighted sections. Falls back to a
    /// heuristic paragraph split when the model cannot deliver.
    pub async fn analyze(
        &self,
        doc: &ReferenceDocument,
        log: &FailureLog,
    ) -> Result<StructureAnalysis, PipelineError> {
        if doc.text.trim().is_empty() {
            return Err(AnalysisError::EmptyInput.into());
        }

        let outcome = call_with_retry(&self.policy, OperationKind::Analysis, log, || {
            let request = ChatRequest::new()
                .with_system(prompt::ANALYSIS_SYSTEM)
                .with_user(prompt::analysis_prompt(&doc.text))
                .with_temperature(0.3);
            let chat = Arc::clone(&self.chat);
            let timeout = self.call_timeout;
            async move {
                let raw = bounded_call(timeout, chat.complete(request)).await?;
                parse_analysis(&raw)
            }
        })
        .await?;

        match outcome {
            Attempted::Ok(analysis) => Ok(analysis),
            Attempted::Fallback(record) => {
                tracing::warn!(
                    attempts = record.attempts,
                    "analysis unavailable, using heuristic section split"
                );
                Ok(heuristic_analysis(&doc.text))
            }
        }
    }
}

fn parse_analysis(raw: &str) -> Result<StructureAnalysis, ProviderError> {
    let value = extract_json(raw)?;
    let schema: AnalysisSchema = serde_json::from_value(value)
        .map_err(|e| ProviderError::InvalidResponse(format!("analysis schema violation: {e}")))?;
    if schema.sections.is_empty() {
        return Err(ProviderError::InvalidResponse(
            "analysis returned no sections".into(),
        ));
    }
    let sections: Vec<Section> = schema
        .sections
        .into_iter()
        .map(|s| Section::new(s.title, s.key_points, s.weight))
        .collect();
    let suggested = schema
        .suggested_slides
        .unwrap_or_else(|| suggested_slide_count(sections.len()))
        .clamp(3, 30);
    Ok(StructureAnalysis {
        sections,
        suggested_slides: suggested,
    })
}

fn heuristic_analysis(text: &str) -> StructureAnalysis {
    let sections = auto_sections(text);
    let suggested = suggested_slide_count(sections.len());
    StructureAnalysis {
        sections,
        suggested_slides: suggested,
    }
}

/// Paragraph-based section split used when the model is unavailable. Takes
/// up to five blank-line separated blocks; the first line names the section
/// and the remaining lines become key points.
pub(crate) fn auto_sections(text: &str) -> Vec<Section> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .take(5)
        .map(|block| {
            let mut lines = block.lines().map(str::trim).filter(|l| !l.is_empty());
            let title_line = lines.next().unwrap_or("Section");
            let title: String = title_line.chars().take(60).collect();
            let key_points: Vec<String> = lines
                .take(5)
                .map(|l| {
                    l.trim_start_matches("- ")
                        .trim_start_matches("* ")
                        .to_string()
                })
                .collect();
            Section::new(title, key_points, 5)
        })
        .collect()
}

pub(crate) fn suggested_slide_count(section_count: usize) -> usize {
    (section_count + 2).clamp(5, 15)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ChatScript, MockChat};

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let chat = Arc::new(MockChat::new(vec![]));
        let analyzer = DocumentAnalyzer::new(chat, RetryPolicy::default(), Duration::from_secs(5));
        let doc = ReferenceDocument::new("   \n\n  ");
        let log = FailureLog::new();
        let err = analyzer.analyze(&doc, &log).await.unwrap_err();
        assert!(matches!(err, PipelineError::Analysis(_)));
    }

    #[tokio::test]
    async fn test_analyze_parses_model_output() {
        let body = serde_json::json!({
            "sections": [
                {"title": "Background", "key_points": ["origin", "motivation"], "weight": 7},
                {"title": "Approach", "key_points": ["method"], "weight": 9}
            ],
            "suggested_slides": 6
        });
        let chat = Arc::new(MockChat::new(vec![ChatScript::Ok(body.to_string())]));
        let analyzer = DocumentAnalyzer::new(
            Arc::clone(&chat) as Arc<dyn ChatModel>,
            RetryPolicy::default(),
            Duration::from_secs(5),
        );
        let doc = ReferenceDocument::new("some reference text");
        let log = FailureLog::new();
        let analysis = analyzer.analyze(&doc, &log).await.unwrap();
        assert_eq!(analysis.sections.len(), 2);
        assert_eq!(analysis.sections[1].weight, 9);
        assert_eq!(analysis.suggested_slides, 6);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_twice_falls_back_to_heuristic() {
        let chat = Arc::new(MockChat::new(vec![
            ChatScript::Degraded,
            ChatScript::Degraded,
        ]));
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_cap_ms: 2,
        };
        let analyzer = DocumentAnalyzer::new(
            Arc::clone(&chat) as Arc<dyn ChatModel>,
            policy,
            Duration::from_secs(5),
        );
        let doc = ReferenceDocument::new("Topic One\nfirst detail\n\nTopic Two\nsecond detail");
        let log = FailureLog::new();
        let analysis = analyzer.analyze(&doc, &log).await.unwrap();
        assert_eq!(analysis.sections.len(), 2);
        assert_eq!(analysis.sections[0].title, "Topic One");
        assert_eq!(log.snapshot().len(), 2);
    }

    #[test]
    fn test_auto_sections_caps_and_strips_bullets() {
        let text = "Alpha\n- one\n- two\n\nBeta\n* three\n\nC\n\nD\n\nE\n\nF";
        let sections = auto_sections(text);
        assert_eq!(sections.len(), 5);
        assert_eq!(sections[0].title, "Alpha");
        assert_eq!(sections[0].key_points, vec!["one", "two"]);
        assert_eq!(sections[1].key_points, vec!["three"]);
    }

    #[test]
    fn test_auto_sections_truncates_long_titles() {
        let long = "x".repeat(200);
        let sections = auto_sections(&long);
        assert_eq!(sections[0].title.chars().count(), 60);
    }

    #[test]
    fn test_suggested_slide_count_bounds() {
        assert_eq!(suggested_slide_count(0), 5);
        assert_eq!(suggested_slide_count(5), 7);
        assert_eq!(suggested_slide_count(40), 15);
    }
}
