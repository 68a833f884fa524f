//! Run coordinator: wires the planner, renderer, cache, and template
//! registry together and drives one generation run end to end.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use deckgen_common::{ReferenceDocument, RenderedSlide, RunSummary, SlideOutline};
use deckgen_providers::{ChatModel, ImageModel};

use crate::anchor::StyleAnchorExtractor;
use crate::assembly;
use crate::cache::CacheStore;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::failure::{FailureLog, FailureRecord};
use crate::planner::OutlinePlanner;
use crate::renderer::{BatchOutput, BatchRenderer, RenderOptions};
use crate::template::TemplateRegistry;

/// Everything one run produced.
#[derive(Debug)]
pub struct RunOutput {
    pub run_id: String,
    pub slides: Vec<RenderedSlide>,
    pub outline: SlideOutline,
    pub summary: RunSummary,
    pub failure_records: Vec<FailureRecord>,
    pub deck_manifest: Option<PathBuf>,
}

pub struct Pipeline {
    config: PipelineConfig,
    templates: TemplateRegistry,
    planner: OutlinePlanner,
    renderer: BatchRenderer,
    cache: Arc<CacheStore>,
    extractor: Arc<StyleAnchorExtractor>,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        chat: Arc<dyn ChatModel>,
        image: Arc<dyn ImageModel>,
    ) -> Result<Self> {
        let templates = match &config.template_dir {
            Some(dir) => TemplateRegistry::with_dir(dir)?,
            None => TemplateRegistry::builtin(),
        };
        let cache = Arc::new(CacheStore::new(&config.cache_dir, config.cache_ttl())?);
        let policy = config.retry_policy();
        let planner = OutlinePlanner::new(
            chat,
            Arc::clone(&cache),
            policy.clone(),
            config.call_timeout(),
        );
        let extractor = Arc::new(StyleAnchorExtractor::new());
        let options = RenderOptions {
            width: config.slide_width,
            height: config.slide_height,
            workers: config.workers,
            call_timeout: config.call_timeout(),
            placeholder_dir: config.output_dir.join("slides"),
        };
        let renderer = BatchRenderer::new(
            image,
            Arc::clone(&cache),
            policy,
            Arc::clone(&extractor),
            options,
        );
        Ok(Self {
            config,
            templates,
            planner,
            renderer,
            cache,
            extractor,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Request cancellation of the run in flight. In-flight provider calls
    /// finish, but no new slide work starts.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Anchor derivations so far, across runs. One per completed batch.
    pub fn anchor_extractions(&self) -> usize {
        self.extractor.extraction_count()
    }

    /// Run the full pipeline: plan an outline for the reference text, render
    /// every slide, and assemble the deck. A fatal provider failure or the
    /// run time ceiling aborts the whole run.
    pub async fn generate(
        &self,
        reference_text: &str,
        style_requirements: &str,
        template_id: &str,
    ) -> Result<RunOutput> {
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let log = Arc::new(FailureLog::new());
        self.cancel.store(false, Ordering::SeqCst);

        let template = self.templates.get(template_id)?.clone();
        let doc = ReferenceDocument::new(reference_text);
        tracing::info!(
            run_id = %run_id,
            template = template_id,
            segments = doc.estimated_segments,
            "generation run start"
        );

        let run = async {
            let planned = self
                .planner
                .plan(&doc, &template, style_requirements, &log)
                .await?;
            let batch = self
                .renderer
                .render_all(&planned.outline, style_requirements, &log, &self.cancel)
                .await?;
            Ok::<_, PipelineError>((planned, batch))
        };
        let (planned, batch): (_, BatchOutput) =
            match tokio::time::timeout(self.config.run_timeout(), run).await {
                Ok(result) => result?,
                Err(_) => {
                    self.cancel.store(true, Ordering::SeqCst);
                    return Err(PipelineError::RunTimeout {
                        ceiling_secs: self.config.run_timeout_secs,
                    });
                }
            };

        let deck_title = planned
            .outline
            .slides
            .first()
            .map(|s| s.title.clone())
            .unwrap_or_else(|| "Presentation".to_string());
        let deck_manifest = if batch.slides.is_empty() {
            None
        } else {
            Some(
                assembly::write_deck(&self.config.output_dir, &deck_title, &run_id, &batch.slides)
                    .await?,
            )
        };

        let summary = RunSummary {
            total_slides: batch.slides.len(),
            cache_hits: batch.cache_hits,
            degraded_slides: batch.degraded,
            outline_cache_hit: planned.cache_hit,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            run_id = %run_id,
            total = summary.total_slides,
            cache_hits = summary.cache_hits,
            degraded = summary.degraded_slides,
            outline_cache_hit = summary.outline_cache_hit,
            elapsed_ms = summary.elapsed_ms,
            "generation run complete"
        );
        Ok(RunOutput {
            run_id,
            slides: batch.slides,
            outline: planned.outline,
            summary,
            failure_records: log.snapshot(),
            deck_manifest,
        })
    }
}
