//! Batch slide rendering. The first slide renders alone and yields the
//! run's style anchor; every remaining slide then renders concurrently
//! under a bounded worker pool against that anchor. A slide whose retries
//! are exhausted becomes a placeholder image, never a hole in the deck.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deckgen_common::{RenderedSlide, SlideOutline, SlideSpec, StyleAnchor};
use deckgen_providers::{ImageModel, ImageRequest};
use tokio::sync::Semaphore;

use crate::anchor::StyleAnchorExtractor;
use crate::cache::{compute_key, CacheStore, ImageMeta};
use crate::error::PipelineError;
use crate::failure::{
    bounded_call, call_with_retry, Attempted, FailureCategory, FailureLog, FailureRecord,
    OperationKind, RecoveryAction, RetryPolicy,
};
use crate::prompt;

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    pub workers: usize,
    pub call_timeout: Duration,
    pub placeholder_dir: PathBuf,
}

/// Phase of one batch, logged at each transition. The anchor is set exactly
/// once, between the first slide and the fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchPhase {
    AnchorPending,
    AnchorSet,
    Rendering,
    Complete,
}

#[derive(Debug)]
pub struct BatchOutput {
    pub slides: Vec<RenderedSlide>,
    pub cache_hits: usize,
    pub degraded: usize,
    pub anchor: Option<StyleAnchor>,
}

/// One rendered slide plus the style report text that arrived with it.
struct SlideRender {
    slide: RenderedSlide,
    style_text: Option<String>,
}

#[derive(Clone)]
pub struct BatchRenderer {
    image: Arc<dyn ImageModel>,
    cache: Arc<CacheStore>,
    policy: RetryPolicy,
    extractor: Arc<StyleAnchorExtractor>,
    options: RenderOptions,
}

impl BatchRenderer {
    pub fn new(
        image: Arc<dyn ImageModel>,
        cache: Arc<CacheStore>,
        policy: RetryPolicy,
        extractor: Arc<StyleAnchorExtractor>,
        options: RenderOptions,
    ) -> Self {
        Self {
            image,
            cache,
            policy,
            extractor,
            options,
        }
    }

    /// Render every slide of the outline. Output is ordered by slide index
    /// and always has one entry per planned slide.
    pub async fn render_all(
        &self,
        outline: &SlideOutline,
        style_requirements: &str,
        log: &Arc<FailureLog>,
        cancel: &Arc<AtomicBool>,
    ) -> Result<BatchOutput, PipelineError> {
        let n = outline.len();
        if n == 0 {
            return Ok(BatchOutput {
                slides: Vec::new(),
                cache_hits: 0,
                degraded: 0,
                anchor: None,
            });
        }

        let mut phase = BatchPhase::AnchorPending;
        tracing::debug!(?phase, total = n, "batch render start");

        let first = self
            .render_one(&outline.slides[0], None, style_requirements, n, log, cancel)
            .await?;
        let (anchor, anchor_degraded) = self
            .extractor
            .extract(first.style_text.as_deref(), style_requirements);
        if anchor_degraded {
            log.record(FailureRecord {
                operation: OperationKind::AnchorExtract,
                attempts: 1,
                category: FailureCategory::Degraded,
                action: RecoveryAction::Fallback,
                message: "first slide carried no usable style report".into(),
            });
        }
        let anchor = Arc::new(anchor);
        phase = BatchPhase::AnchorSet;
        tracing::debug!(?phase, degraded = anchor_degraded, "style anchor fixed for run");

        phase = BatchPhase::Rendering;
        tracing::debug!(?phase, remaining = n - 1, workers = self.options.workers, "fan-out");
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut handles = Vec::with_capacity(n.saturating_sub(1));
        for spec in outline.slides.iter().skip(1) {
            let renderer = self.clone();
            let spec = spec.clone();
            let anchor = Arc::clone(&anchor);
            let style = style_requirements.to_string();
            let log = Arc::clone(log);
            let cancel = Arc::clone(cancel);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::Cancelled)?;
                renderer
                    .render_one(&spec, Some(&anchor), &style, n, &log, &cancel)
                    .await
            }));
        }

        let mut slides = vec![first.slide];
        let mut fatal: Option<PipelineError> = None;
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(Ok(rendered)) => slides.push(rendered.slide),
                Ok(Err(e)) => {
                    // A run-level cancellation is only the reason when no
                    // task reported the real failure.
                    let supersedes = match &fatal {
                        None => true,
                        Some(PipelineError::Cancelled) => {
                            !matches!(e, PipelineError::Cancelled)
                        }
                        Some(_) => false,
                    };
                    if supersedes {
                        fatal = Some(e);
                    }
                }
                Err(join_error) => {
                    if fatal.is_none() {
                        fatal = Some(PipelineError::Generic(anyhow::anyhow!(
                            "render task failed: {join_error}"
                        )));
                    }
                }
            }
        }
        if let Some(error) = fatal {
            return Err(error);
        }

        slides.sort_by_key(|s| s.index);
        if slides.len() != n || slides.iter().enumerate().any(|(i, s)| s.index != i) {
            return Err(PipelineError::Generic(anyhow::anyhow!(
                "render batch incomplete: {} of {} slides present",
                slides.len(),
                n
            )));
        }

        phase = BatchPhase::Complete;
        let cache_hits = slides.iter().filter(|s| s.from_cache).count();
        let degraded = slides.iter().filter(|s| s.degraded).count();
        tracing::debug!(?phase, cache_hits, degraded, "batch render done");
        Ok(BatchOutput {
            slides,
            cache_hits,
            degraded,
            anchor: Some(Arc::unwrap_or_clone(anchor)),
        })
    }

    /// Render a single slide through the cache. Keys depend on the slide
    /// content, the style context (anchor fingerprint once one exists, raw
    /// requirements for the first slide), and the model.
    async fn render_one(
        &self,
        spec: &SlideSpec,
        anchor: Option<&StyleAnchor>,
        style_requirements: &str,
        page_count: usize,
        log: &FailureLog,
        cancel: &Arc<AtomicBool>,
    ) -> Result<SlideRender, PipelineError> {
        if cancel.load(Ordering::SeqCst) {
            return Err(PipelineError::Cancelled);
        }

        let slide_json = serde_json::to_string(spec)?;
        let style_context = anchor
            .map(StyleAnchor::fingerprint)
            .unwrap_or_else(|| style_requirements.to_string());
        let key = compute_key(&[&slide_json, &style_context, self.image.model_id()]);

        if let Some(hit) = self.cached_slide(&key, spec).await? {
            return Ok(hit);
        }
        let lock = self.cache.key_lock(&key).await;
        let _guard = lock.lock().await;
        if let Some(hit) = self.cached_slide(&key, spec).await? {
            return Ok(hit);
        }

        let prompt_text = prompt::slide_prompt(
            spec,
            anchor,
            style_requirements,
            self.options.width,
            self.options.height,
            page_count,
        );
        let outcome = call_with_retry(&self.policy, OperationKind::ImageRender, log, || {
            let request = ImageRequest {
                prompt: prompt_text.clone(),
                width: self.options.width,
                height: self.options.height,
                page_index: spec.index,
                page_count,
            };
            let image = Arc::clone(&self.image);
            let timeout = self.options.call_timeout;
            async move { bounded_call(timeout, image.render(request)).await }
        })
        .await;

        match outcome {
            Err(error) => {
                // Stop sibling renders; one fatal failure ends the run.
                cancel.store(true, Ordering::SeqCst);
                Err(error)
            }
            Ok(Attempted::Ok(response)) => {
                if cancel.load(Ordering::SeqCst) {
                    return Err(PipelineError::Cancelled);
                }
                let meta = ImageMeta {
                    prompt: prompt_text.clone(),
                    model_id: response.model_id.clone(),
                    media_type: response.media_type.clone(),
                    style_text: response.style_text.clone(),
                };
                let path = self.cache.put_image(&key, &response.data, meta).await?;
                tracing::info!(index = spec.index, %key, "slide rendered");
                Ok(SlideRender {
                    slide: RenderedSlide {
                        index: spec.index,
                        image_path: path,
                        prompt: prompt_text,
                        model_id: response.model_id,
                        from_cache: false,
                        degraded: false,
                    },
                    style_text: response.style_text,
                })
            }
            Ok(Attempted::Fallback(record)) => {
                tracing::warn!(
                    index = spec.index,
                    attempts = record.attempts,
                    "slide render failed, writing placeholder"
                );
                let path = self.write_placeholder(spec).await?;
                Ok(SlideRender {
                    slide: RenderedSlide {
                        index: spec.index,
                        image_path: path,
                        prompt: prompt_text,
                        model_id: self.image.model_id().to_string(),
                        from_cache: false,
                        degraded: true,
                    },
                    style_text: None,
                })
            }
        }
    }

    async fn cached_slide(
        &self,
        key: &str,
        spec: &SlideSpec,
    ) -> Result<Option<SlideRender>, PipelineError> {
        let Some((path, meta)) = self.cache.get_image(key).await? else {
            return Ok(None);
        };
        tracing::debug!(index = spec.index, key, "slide cache hit");
        Ok(Some(SlideRender {
            slide: RenderedSlide {
                index: spec.index,
                image_path: path,
                prompt: meta.prompt,
                model_id: meta.model_id,
                from_cache: true,
                degraded: false,
            },
            style_text: meta.style_text,
        }))
    }

    /// Placeholder image for a slide the provider never delivered. Written
    /// to the output directory, not the cache, so a later run retries the
    /// render.
    async fn write_placeholder(&self, spec: &SlideSpec) -> Result<PathBuf, PipelineError> {
        tokio::fs::create_dir_all(&self.options.placeholder_dir).await?;
        let path = self
            .options
            .placeholder_dir
            .join(format!("slide_{:02}_placeholder.svg", spec.index));
        let svg = placeholder_svg(&spec.title, self.options.width, self.options.height);
        tokio::fs::write(&path, svg).await?;
        Ok(path)
    }
}

fn placeholder_svg(title: &str, width: u32, height: u32) -> String {
    let title = xml_escape(title);
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">
  <defs>
    <linearGradient id="bg" x1="0" y1="0" x2="0" y2="1">
      <stop offset="0%" stop-color="#1e3c72"/>
      <stop offset="100%" stop-color="#2a5298"/>
    </linearGradient>
  </defs>
  <rect width="{width}" height="{height}" fill="url(#bg)"/>
  <text x="50%" y="45%" text-anchor="middle" fill="#ffffff" font-family="sans-serif" font-size="56">{title}</text>
  <text x="50%" y="58%" text-anchor="middle" fill="#c9d4e8" font-family="sans-serif" font-size="28">placeholder</text>
</svg>
"##
    )
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
