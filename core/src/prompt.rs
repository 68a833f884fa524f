//! Prompt builders for the three provider-facing operations. Prompts are
//! deterministic functions of their inputs so cache keys derived from the
//! same inputs always describe the same request.

use deckgen_common::{SlideSpec, StructureAnalysis, StyleAnchor, TemplateSpec};

pub const ANALYSIS_SYSTEM: &str = "You are a document analyst. You read reference \
material and extract its section structure as strict JSON. Respond with JSON only, \
no prose and no code fences.";

const OUTLINE_SYSTEM: &str = "You are a presentation planner. You turn analyzed \
document structure into a slide outline as strict JSON. Respond with JSON only, \
no prose and no code fences.";

pub fn outline_system() -> &'static str {
    OUTLINE_SYSTEM
}

/// Stage-1 prompt: extract weighted sections from raw reference text.
pub fn analysis_prompt(text: &str) -> String {
    format!(
        "Analyze the following reference material and break it into sections.\n\
         For each section give a short title, up to five key points, and a weight \
         from 1 to 10 for how much slide space it deserves.\n\
         Also suggest a total slide count for a presentation of this material.\n\n\
         Respond with JSON matching this schema:\n\
         {{\"sections\": [{{\"title\": \"...\", \"key_points\": [\"...\"], \"weight\": 5}}], \
         \"suggested_slides\": 8}}\n\n\
         Reference material:\n{text}"
    )
}

/// Stage-2 prompt: turn an analysis into a slide outline that honors the
/// template's sequence and slide-count range.
pub fn outline_prompt(
    analysis: &StructureAnalysis,
    template: &TemplateSpec,
    style_requirements: &str,
) -> String {
    let mut sections = String::new();
    for section in &analysis.sections {
        sections.push_str(&format!(
            "- {} (weight {}): {}\n",
            section.title,
            section.weight,
            section.key_points.join("; ")
        ));
    }
    let sequence: Vec<String> = template
        .sequence
        .iter()
        .map(|t| t.to_string())
        .collect();

    let mut prompt = format!(
        "Plan a slide outline for a presentation.\n\n\
         Template \"{}\" ({}), narrative: {}.\n\
         Slide type sequence to follow: [{}].\n\
         Target slide count: {} to {} (analysis suggested {}).\n\
         Style requirements from the requester: {}\n",
        template.name,
        template.description,
        template.narrative,
        sequence.join(", "),
        template.suggested_slides.min,
        template.suggested_slides.max,
        analysis.suggested_slides,
        style_requirements,
    );
    if let Some(layout) = &template.style_hints.layout {
        prompt.push_str(&format!("Layout guidance for layout_hint values: {layout}\n"));
    }
    prompt.push_str(&format!(
        "\nSections from analysis:\n{sections}\n\
         Rules:\n\
         - Keep the slide type sequence; repeat content slides as needed within the target range.\n\
         - A section with weight 8 or more may span two content slides.\n\
         - Merge neighboring sections with weight below 5 into one slide.\n\
         - Each content slide gets a title and 2 to 5 concise points.\n\n\
         Respond with JSON matching this schema:\n\
         {{\"slides\": [{{\"slide_type\": \"content\", \"title\": \"...\", \
         \"points\": [\"...\"], \"layout_hint\": \"...\"}}]}}"
    ));
    prompt
}

/// Image prompt for one slide. With no anchor (first slide of a run) the
/// prompt asks for a machine-readable style report alongside the image;
/// with an anchor it demands visual consistency with the anchored style.
pub fn slide_prompt(
    spec: &SlideSpec,
    anchor: Option<&StyleAnchor>,
    style_requirements: &str,
    width: u32,
    height: u32,
    page_count: usize,
) -> String {
    let mut prompt = format!(
        "Render presentation slide {} of {page_count} as a single {width}x{height} \
         image (16:9).\n\
         Slide type: {}.\n\
         Title: {}\n",
        spec.index + 1,
        spec.slide_type,
        spec.title,
    );
    if !spec.points.is_empty() {
        prompt.push_str("Points:\n");
        for point in &spec.points {
            prompt.push_str(&format!("- {point}\n"));
        }
    }
    if let Some(hint) = &spec.layout_hint {
        prompt.push_str(&format!("Layout: {hint}\n"));
    }

    match anchor {
        Some(anchor) => {
            prompt.push_str(
                "\nMatch the established deck style exactly. Do not introduce new \
                 colors, fonts, or layout motifs.\n",
            );
            if !anchor.palette.is_empty() {
                prompt.push_str(&format!("Palette: {}\n", anchor.palette.join(", ")));
            }
            if !anchor.typography.is_empty() {
                prompt.push_str(&format!("Typography: {}\n", anchor.typography));
            }
            if !anchor.layout_motif.is_empty() {
                prompt.push_str(&format!("Layout motif: {}\n", anchor.layout_motif));
            }
            if !anchor.raw_style_text.is_empty() {
                prompt.push_str(&format!("Style notes: {}\n", anchor.raw_style_text));
            }
        }
        None => {
            prompt.push_str(&format!(
                "\nStyle requirements: {style_requirements}\n\
                 This is the first slide; it defines the deck's visual style.\n\
                 In addition to the image, return one text part containing a JSON \
                 style report of the style you used: {{\"palette\": [\"#rrggbb\"], \
                 \"typography\": \"...\", \"layout\": \"...\"}}\n"
            ));
        }
    }

    prompt.push_str(&format!(
        "\nPlace the page number \"{} / {page_count}\" in the bottom-right corner \
         in small gray text (#666666).",
        spec.index + 1
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckgen_common::{Section, SlideType};

    fn spec() -> SlideSpec {
        SlideSpec {
            index: 2,
            slide_type: SlideType::Content,
            title: "Caching Strategy".into(),
            points: vec!["content addressing".into(), "atomic writes".into()],
            layout_hint: Some("two-column".into()),
        }
    }

    #[test]
    fn test_analysis_prompt_embeds_text() {
        let p = analysis_prompt("the reference body");
        assert!(p.contains("the reference body"));
        assert!(p.contains("suggested_slides"));
    }

    #[test]
    fn test_outline_prompt_carries_template_bounds() {
        let analysis = StructureAnalysis {
            sections: vec![Section::new("Intro", vec!["a point".into()], 6)],
            suggested_slides: 7,
        };
        let registry = crate::template::TemplateRegistry::builtin();
        let template = registry.get("standard").unwrap();
        let p = outline_prompt(&analysis, template, "dark theme");
        assert!(p.contains("5 to 8"));
        assert!(p.contains("Intro (weight 6)"));
        assert!(p.contains("dark theme"));
        assert!(p.contains("conclusion_cta"));
    }

    #[test]
    fn test_first_slide_prompt_requests_style_report() {
        let p = slide_prompt(&spec(), None, "bold colors", 1600, 900, 6);
        assert!(p.contains("style report"));
        assert!(p.contains("bold colors"));
        assert!(p.contains("3 / 6"));
        assert!(p.contains("1600x900"));
    }

    #[test]
    fn test_anchored_prompt_omits_style_report_request() {
        let anchor = StyleAnchor {
            palette: vec!["#10243e".into()],
            typography: "geometric sans".into(),
            layout_motif: "left rail".into(),
            raw_style_text: "bold colors".into(),
        };
        let p = slide_prompt(&spec(), Some(&anchor), "ignored here", 1600, 900, 6);
        assert!(!p.contains("style report"));
        assert!(p.contains("#10243e"));
        assert!(p.contains("geometric sans"));
        assert!(!p.contains("ignored here"));
    }
}
