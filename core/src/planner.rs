//! Stage 2: outline planning. Consumes the structure analysis and a deck
//! template, asks the model for a slide outline, and repairs or replaces the
//! result so the outline always honors the template's slide-type backbone
//! and count range. Outlines are cached under a key covering every input
//! that shapes them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use deckgen_common::{
    ReferenceDocument, Section, SlideOutline, SlideSpec, SlideType, StructureAnalysis,
    TemplateSpec,
};
use deckgen_providers::{extract_json, ChatModel, ChatRequest, ProviderError};
use serde::Deserialize;

use crate::analyzer::DocumentAnalyzer;
use crate::cache::{compute_key, CacheStore};
use crate::error::PipelineError;
use crate::failure::{
    bounded_call, call_with_retry, Attempted, FailureLog, OperationKind, RetryPolicy,
};
use crate::prompt;

/// Bumped whenever planning semantics change, so stale cached outlines
/// produced by older planners are not reused.
pub const PLANNER_VERSION: &str = "2";

#[derive(Debug)]
pub struct PlannedOutline {
    pub outline: SlideOutline,
    pub cache_hit: bool,
    pub degraded: bool,
}

#[derive(Debug, Deserialize)]
struct OutlineSlideSchema {
    slide_type: SlideType,
    title: String,
    #[serde(default)]
    points: Vec<String>,
    #[serde(default)]
    layout_hint: Option<String>,
}

#[derive(Deserialize)]
struct OutlineSchema {
    slides: Vec<OutlineSlideSchema>,
}

/// Content material flowing into slide slots, either from the model's
/// outline or straight from analyzer sections.
#[derive(Debug, Clone)]
struct ContentCard {
    title: String,
    points: Vec<String>,
    weight: u8,
    layout_hint: Option<String>,
}

pub struct OutlinePlanner {
    chat: Arc<dyn ChatModel>,
    analyzer: DocumentAnalyzer,
    cache: Arc<CacheStore>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl OutlinePlanner {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        cache: Arc<CacheStore>,
        policy: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        let analyzer = DocumentAnalyzer::new(Arc::clone(&chat), policy.clone(), call_timeout);
        Self {
            chat,
            analyzer,
            cache,
            policy,
            call_timeout,
        }
    }

    /// Cache key for an outline. Covers the reference text, style
    /// requirements, template, planner version, and model, so any change to
    /// an input produces a fresh plan.
    pub fn outline_key(&self, doc_text: &str, style_requirements: &str, template_id: &str) -> String {
        compute_key(&[
            doc_text,
            style_requirements,
            template_id,
            PLANNER_VERSION,
            self.chat.model_id(),
        ])
    }

    /// Produce (or fetch) the outline for one run. Concurrent callers with
    /// the same key serialize on a per-key lock; the second caller sees the
    /// first one's cached outline instead of planning again.
    pub async fn plan(
        &self,
        doc: &ReferenceDocument,
        template: &TemplateSpec,
        style_requirements: &str,
        log: &FailureLog,
    ) -> Result<PlannedOutline, PipelineError> {
        let key = self.outline_key(&doc.text, style_requirements, &template.id);
        if let Some(outline) = self.cache.get_outline::<SlideOutline>(&key).await? {
            tracing::info!(%key, slides = outline.len(), "outline cache hit");
            return Ok(PlannedOutline {
                outline,
                cache_hit: true,
                degraded: false,
            });
        }

        let lock = self.cache.key_lock(&key).await;
        let _guard = lock.lock().await;
        if let Some(outline) = self.cache.get_outline::<SlideOutline>(&key).await? {
            tracing::info!(%key, "outline produced by concurrent planner");
            return Ok(PlannedOutline {
                outline,
                cache_hit: true,
                degraded: false,
            });
        }

        let analysis = self.analyzer.analyze(doc, log).await?;

        let outcome = call_with_retry(&self.policy, OperationKind::OutlinePlan, log, || {
            let request = ChatRequest::new()
                .with_system(prompt::outline_system())
                .with_user(prompt::outline_prompt(&analysis, template, style_requirements))
                .with_temperature(0.4);
            let chat = Arc::clone(&self.chat);
            let timeout = self.call_timeout;
            async move {
                let raw = bounded_call(timeout, chat.complete(request)).await?;
                parse_outline(&raw)
            }
        })
        .await?;

        let (outline, degraded) = match outcome {
            Attempted::Ok(slides) => (fit_to_template(slides, template, &analysis), false),
            Attempted::Fallback(record) => {
                tracing::warn!(
                    attempts = record.attempts,
                    "outline unavailable, assembling from analysis sections"
                );
                let material = cards_from_sections(&analysis.sections);
                (assemble(material, template), true)
            }
        };

        self.cache.put_outline(&key, &outline).await?;
        tracing::info!(%key, slides = outline.len(), degraded, "outline planned");
        Ok(PlannedOutline {
            outline,
            cache_hit: false,
            degraded,
        })
    }
}

fn parse_outline(raw: &str) -> Result<Vec<OutlineSlideSchema>, ProviderError> {
    let value = extract_json(raw)?;
    let schema: OutlineSchema = serde_json::from_value(value)
        .map_err(|e| ProviderError::InvalidResponse(format!("outline schema violation: {e}")))?;
    if schema.slides.is_empty() {
        return Err(ProviderError::InvalidResponse(
            "outline contained no slides".into(),
        ));
    }
    Ok(schema.slides)
}

fn structural_backbone(types: impl Iterator<Item = SlideType>) -> Vec<SlideType> {
    types.filter(SlideType::is_structural).collect()
}

/// Accept a conforming model outline as-is; otherwise rebuild it around the
/// template backbone using the model's content slides as material.
fn fit_to_template(
    slides: Vec<OutlineSlideSchema>,
    template: &TemplateSpec,
    analysis: &StructureAnalysis,
) -> SlideOutline {
    let model_backbone = structural_backbone(slides.iter().map(|s| s.slide_type));
    let template_backbone = structural_backbone(template.sequence.iter().copied());
    let conforms = template.suggested_slides.contains(slides.len())
        && model_backbone == template_backbone
        && slides.first().map(|s| s.slide_type) == Some(SlideType::Title);

    if conforms {
        let specs = slides
            .into_iter()
            .enumerate()
            .map(|(index, s)| SlideSpec {
                index,
                slide_type: s.slide_type,
                title: s.title,
                points: s.points,
                layout_hint: s.layout_hint,
            })
            .collect();
        return SlideOutline {
            template_id: template.id.clone(),
            slides: specs,
        };
    }

    tracing::warn!(
        got = slides.len(),
        min = template.suggested_slides.min,
        max = template.suggested_slides.max,
        "model outline does not fit template, rebuilding"
    );
    let mut material: Vec<ContentCard> = slides
        .into_iter()
        .filter(|s| !s.slide_type.is_structural())
        .map(|s| ContentCard {
            title: s.title,
            points: s.points,
            weight: 5,
            layout_hint: s.layout_hint,
        })
        .collect();
    if material.is_empty() {
        material = cards_from_sections(&analysis.sections);
    }
    assemble(material, template)
}

fn cards_from_sections(sections: &[Section]) -> Vec<ContentCard> {
    sections
        .iter()
        .map(|s| ContentCard {
            title: s.title.clone(),
            points: s.key_points.clone(),
            weight: s.weight,
            layout_hint: None,
        })
        .collect()
}

/// Build an outline from scratch: walk the template sequence, synthesize
/// structural slides, and feed content cards into the content slots. Extra
/// cards are inserted before the closing structural slides while the total
/// stays within the template range.
fn assemble(material: Vec<ContentCard>, template: &TemplateSpec) -> SlideOutline {
    let structural_count = template
        .sequence
        .iter()
        .filter(|t| t.is_structural())
        .count();
    let content_budget = template
        .suggested_slides
        .max
        .saturating_sub(structural_count)
        .max(template.content_slots());

    let deck_title = material
        .first()
        .map(|c| c.title.clone())
        .unwrap_or_else(|| "Presentation".to_string());
    let mut queue: VecDeque<ContentCard> = allocate_content(material, content_budget).into();
    let agenda: Vec<String> = queue.iter().map(|c| c.title.clone()).take(8).collect();
    let takeaways: Vec<String> = queue
        .iter()
        .filter_map(|c| c.points.first().cloned())
        .take(3)
        .collect();

    let mut slides: Vec<SlideSpec> = Vec::new();
    for slot in &template.sequence {
        let spec = match slot {
            SlideType::Title => SlideSpec {
                index: 0,
                slide_type: SlideType::Title,
                title: deck_title.clone(),
                points: Vec::new(),
                layout_hint: None,
            },
            SlideType::Toc => SlideSpec {
                index: 0,
                slide_type: SlideType::Toc,
                title: "Agenda".to_string(),
                points: agenda.clone(),
                layout_hint: None,
            },
            SlideType::ConclusionCta => {
                let mut points = takeaways.clone();
                points.push("Questions and next steps".to_string());
                SlideSpec {
                    index: 0,
                    slide_type: SlideType::ConclusionCta,
                    title: "Key Takeaways".to_string(),
                    points,
                    layout_hint: None,
                }
            }
            SlideType::Content | SlideType::Chart => {
                let card = queue.pop_front().unwrap_or_else(filler_card);
                let layout_hint = if *slot == SlideType::Chart {
                    Some(card.layout_hint.unwrap_or_else(|| "chart".to_string()))
                } else {
                    card.layout_hint
                };
                SlideSpec {
                    index: 0,
                    slide_type: *slot,
                    title: card.title,
                    points: card.points,
                    layout_hint,
                }
            }
        };
        slides.push(spec);
    }

    // Leftover material goes in front of the closing structural slides.
    let tail_start = slides
        .iter()
        .rposition(|s| !s.slide_type.is_structural())
        .map(|p| p + 1)
        .unwrap_or_else(|| slides.len().saturating_sub(1));
    let mut insert_at = tail_start;
    while slides.len() < template.suggested_slides.max {
        let Some(card) = queue.pop_front() else {
            break;
        };
        slides.insert(
            insert_at,
            SlideSpec {
                index: 0,
                slide_type: SlideType::Content,
                title: card.title,
                points: card.points,
                layout_hint: card.layout_hint,
            },
        );
        insert_at += 1;
    }

    // Short templates can still declare a higher minimum; pad to it.
    while slides.len() < template.suggested_slides.min {
        let card = filler_card();
        slides.insert(
            insert_at,
            SlideSpec {
                index: 0,
                slide_type: SlideType::Content,
                title: card.title,
                points: card.points,
                layout_hint: None,
            },
        );
        insert_at += 1;
    }

    for (index, slide) in slides.iter_mut().enumerate() {
        slide.index = index;
    }
    SlideOutline {
        template_id: template.id.clone(),
        slides,
    }
}

fn filler_card() -> ContentCard {
    ContentCard {
        title: "Discussion".to_string(),
        points: Vec::new(),
        weight: 3,
        layout_hint: None,
    }
}

/// Shape content cards to a slot budget. Heavy cards (weight 8+ with enough
/// points) split across two slides when there is room; when over budget,
/// the lightest neighboring pair merges until the cards fit.
fn allocate_content(cards: Vec<ContentCard>, budget: usize) -> Vec<ContentCard> {
    let mut out: Vec<ContentCard> = Vec::new();
    for card in cards {
        if card.weight >= 8 && card.points.len() >= 4 && out.len() + 2 <= budget {
            let mid = card.points.len().div_ceil(2);
            let (head, tail) = card.points.split_at(mid);
            out.push(ContentCard {
                title: format!("{} (1/2)", card.title),
                points: head.to_vec(),
                weight: card.weight,
                layout_hint: card.layout_hint.clone(),
            });
            out.push(ContentCard {
                title: format!("{} (2/2)", card.title),
                points: tail.to_vec(),
                weight: card.weight,
                layout_hint: card.layout_hint,
            });
        } else {
            out.push(card);
        }
    }

    while out.len() > budget && out.len() >= 2 {
        let mut lightest = 0;
        let mut lightest_sum = u16::MAX;
        for i in 0..out.len() - 1 {
            let sum = u16::from(out[i].weight) + u16::from(out[i + 1].weight);
            if sum < lightest_sum {
                lightest_sum = sum;
                lightest = i;
            }
        }
        let second = out.remove(lightest + 1);
        let first = &mut out[lightest];
        first.title = format!("{} / {}", first.title, second.title);
        first.points.extend(second.points);
        first.points.truncate(6);
        first.weight = first.weight.max(second.weight);
    }
    out
}
