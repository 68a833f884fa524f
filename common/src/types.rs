use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Immutable input to a generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceDocument {
    pub text: String,
    pub language: String,
    /// Rough count of blank-line separated topic blocks in the text.
    pub estimated_segments: usize,
}

impl ReferenceDocument {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let estimated_segments = text
            .split("\n\n")
            .filter(|block| !block.trim().is_empty())
            .count();
        let language = detect_language(&text);
        Self {
            text,
            language,
            estimated_segments,
        }
    }
}

fn detect_language(text: &str) -> String {
    let cjk = text
        .chars()
        .filter(|c| {
            let c = *c as u32;
            (0x3040..=0x30ff).contains(&c) || (0x4e00..=0x9fff).contains(&c)
        })
        .count();
    if cjk > 0 && cjk * 10 >= text.chars().count() {
        "ja".to_string()
    } else {
        "en".to_string()
    }
}

/// One detected section of the reference text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub key_points: Vec<String>,
    /// Informational weight on a 1..=10 scale, drives slide allocation.
    pub weight: u8,
}

impl Section {
    pub fn new(title: impl Into<String>, key_points: Vec<String>, weight: u8) -> Self {
        Self {
            title: title.into(),
            key_points,
            weight: weight.clamp(1, 10),
        }
    }
}

/// Output of document analysis, consumed only by the outline planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureAnalysis {
    pub sections: Vec<Section>,
    pub suggested_slides: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideType {
    Title,
    Toc,
    Content,
    Chart,
    ConclusionCta,
}

impl fmt::Display for SlideType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlideType::Title => "title",
            SlideType::Toc => "toc",
            SlideType::Content => "content",
            SlideType::Chart => "chart",
            SlideType::ConclusionCta => "conclusion_cta",
        };
        write!(f, "{s}")
    }
}

impl SlideType {
    /// Slide types whose content comes from the narrative tag rather than
    /// analyzer sections.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SlideType::Title | SlideType::Toc | SlideType::ConclusionCta
        )
    }
}

/// One planned slide within an outline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideSpec {
    pub index: usize,
    pub slide_type: SlideType,
    pub title: String,
    pub points: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_hint: Option<String>,
}

/// Ordered plan of slides for one presentation. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideOutline {
    pub template_id: String,
    pub slides: Vec<SlideSpec>,
}

impl SlideOutline {
    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }
}

/// Inclusive slide-count range a template considers acceptable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SuggestedRange {
    pub min: usize,
    pub max: usize,
}

impl SuggestedRange {
    pub fn contains(&self, n: usize) -> bool {
        n >= self.min && n <= self.max
    }

    pub fn clamp(&self, n: usize) -> usize {
        n.clamp(self.min, self.max)
    }
}

/// Free-text style cues carried by a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateStyleHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typography: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub colors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special: Option<String>,
}

/// Read-only template record consumed by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sequence: Vec<SlideType>,
    pub narrative: String,
    pub suggested_slides: SuggestedRange,
    #[serde(default)]
    pub style_hints: TemplateStyleHints,
}

impl TemplateSpec {
    /// Number of `content` slots in the fixed sequence.
    pub fn content_slots(&self) -> usize {
        self.sequence
            .iter()
            .filter(|t| !t.is_structural())
            .count()
    }
}

/// Visual fingerprint taken from the first rendered slide and imposed on
/// every later slide in the same run. Never mutated once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleAnchor {
    pub palette: Vec<String>,
    pub typography: String,
    pub layout_motif: String,
    pub raw_style_text: String,
}

impl StyleAnchor {
    /// Canonical string used for content-addressed keying of dependent
    /// slides. Any change to the anchor changes the fingerprint.
    pub fn fingerprint(&self) -> String {
        format!(
            "palette={};typography={};layout={};raw={}",
            self.palette.join(","),
            self.typography,
            self.layout_motif,
            self.raw_style_text
        )
    }
}

/// One rendered slide image, in outline order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedSlide {
    pub index: usize,
    pub image_path: PathBuf,
    pub prompt: String,
    pub model_id: String,
    pub from_cache: bool,
    pub degraded: bool,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_slides: usize,
    pub cache_hits: usize,
    pub degraded_slides: usize,
    pub outline_cache_hit: bool,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_document_segments() {
        let doc = ReferenceDocument::new("intro text\n\nsecond block\n\n\n\nthird");
        assert_eq!(doc.estimated_segments, 3);
        assert_eq!(doc.language, "en");
    }

    #[test]
    fn test_language_detection_japanese() {
        let doc = ReferenceDocument::new("これはテストです。日本語の文章。");
        assert_eq!(doc.language, "ja");
    }

    #[test]
    fn test_slide_type_serde_names() {
        let json = serde_json::to_string(&SlideType::ConclusionCta).unwrap();
        assert_eq!(json, "\"conclusion_cta\"");
        let back: SlideType = serde_json::from_str("\"toc\"").unwrap();
        assert_eq!(back, SlideType::Toc);
    }

    #[test]
    fn test_anchor_fingerprint_changes_with_palette() {
        let a = StyleAnchor {
            palette: vec!["#112233".into()],
            typography: "serif".into(),
            layout_motif: "left-aligned".into(),
            raw_style_text: "clean".into(),
        };
        let mut b = a.clone();
        b.palette = vec!["#445566".into()];
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_suggested_range() {
        let r = SuggestedRange { min: 4, max: 8 };
        assert!(r.contains(4));
        assert!(!r.contains(9));
        assert_eq!(r.clamp(12), 8);
        assert_eq!(r.clamp(1), 4);
    }
}
