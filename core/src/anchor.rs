//! Style anchor extraction. The first rendered slide of a run comes back
//! with a machine-readable style report; this module turns that report into
//! the anchor every later slide is rendered against. Extraction happens at
//! most once per run, whether the first slide was freshly rendered or came
//! from the cache with its stored report.

use std::sync::atomic::{AtomicUsize, Ordering};

use deckgen_common::StyleAnchor;
use deckgen_providers::extract_json;
use serde::Deserialize;

#[derive(Deserialize)]
struct StyleReportSchema {
    #[serde(default)]
    palette: Vec<String>,
    #[serde(default)]
    typography: Option<String>,
    #[serde(default)]
    layout: Option<String>,
}

#[derive(Default)]
pub struct StyleAnchorExtractor {
    extractions: AtomicUsize,
}

impl StyleAnchorExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times an anchor has been derived. One per run when the
    /// renderer behaves.
    pub fn extraction_count(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    /// Derive the run's anchor from the first slide's style report. A
    /// missing or unusable report degrades to an anchor that carries only
    /// the raw style requirements, so downstream slides still share one
    /// style context. Returns the anchor and whether it is degraded.
    pub fn extract(
        &self,
        style_text: Option<&str>,
        style_requirements: &str,
    ) -> (StyleAnchor, bool) {
        self.extractions.fetch_add(1, Ordering::SeqCst);

        if let Some(report) = style_text.and_then(parse_report) {
            let usable = !report.palette.is_empty() || report.typography.is_some();
            if usable {
                let anchor = StyleAnchor {
                    palette: report.palette,
                    typography: report.typography.unwrap_or_default(),
                    layout_motif: report.layout.unwrap_or_default(),
                    raw_style_text: style_requirements.to_string(),
                };
                tracing::debug!(
                    palette = anchor.palette.len(),
                    "style anchor extracted from first slide report"
                );
                return (anchor, false);
            }
        }

        tracing::warn!("first slide carried no usable style report, anchoring on raw requirements");
        let anchor = StyleAnchor {
            palette: Vec::new(),
            typography: String::new(),
            layout_motif: String::new(),
            raw_style_text: style_requirements.to_string(),
        };
        (anchor, true)
    }
}

fn parse_report(raw: &str) -> Option<StyleReportSchema> {
    let value = extract_json(raw).ok()?;
    serde_json::from_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_valid_report() {
        let extractor = StyleAnchorExtractor::new();
        let report = r##"{"palette": ["#10243e", "#f4f4f4"], "typography": "geometric sans", "layout": "left rail"}"##;
        let (anchor, degraded) = extractor.extract(Some(report), "clean, modern");
        assert!(!degraded);
        assert_eq!(anchor.palette.len(), 2);
        assert_eq!(anchor.typography, "geometric sans");
        assert_eq!(anchor.raw_style_text, "clean, modern");
        assert_eq!(extractor.extraction_count(), 1);
    }

    #[test]
    fn test_report_wrapped_in_prose_still_parses() {
        let extractor = StyleAnchorExtractor::new();
        let report = "Here is the style I used: {\"palette\": [\"#000000\"], \"typography\": \"serif\"}";
        let (anchor, degraded) = extractor.extract(Some(report), "req");
        assert!(!degraded);
        assert_eq!(anchor.palette, vec!["#000000"]);
    }

    #[test]
    fn test_missing_report_degrades() {
        let extractor = StyleAnchorExtractor::new();
        let (anchor, degraded) = extractor.extract(None, "bold, dark");
        assert!(degraded);
        assert!(anchor.palette.is_empty());
        assert_eq!(anchor.raw_style_text, "bold, dark");
    }

    #[test]
    fn test_junk_report_degrades() {
        let extractor = StyleAnchorExtractor::new();
        let (_, degraded) = extractor.extract(Some("not json at all"), "req");
        assert!(degraded);
    }

    #[test]
    fn test_empty_report_degrades() {
        let extractor = StyleAnchorExtractor::new();
        let (_, degraded) = extractor.extract(Some("{}"), "req");
        assert!(degraded);
    }
}
