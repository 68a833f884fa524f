//! Final deck assembly: collect the rendered images into the output
//! directory and write a Markdown deck plus a machine-readable manifest.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use deckgen_common::RenderedSlide;
use serde::Serialize;

use crate::error::{PipelineError, Result};

#[derive(Serialize)]
struct DeckManifest<'a> {
    run_id: &'a str,
    title: &'a str,
    created_at: DateTime<Utc>,
    slides: Vec<ManifestSlide>,
}

#[derive(Serialize)]
struct ManifestSlide {
    index: usize,
    file: String,
    degraded: bool,
    from_cache: bool,
}

/// Copy slide images into `output_dir/slides/` under stable names and write
/// `deck.md` and `manifest.json` beside them. Returns the manifest path.
pub async fn write_deck(
    output_dir: &Path,
    title: &str,
    run_id: &str,
    slides: &[RenderedSlide],
) -> Result<PathBuf> {
    let slide_dir = output_dir.join("slides");
    tokio::fs::create_dir_all(&slide_dir).await?;

    let mut deck = format!("# {title}\n\n");
    let mut manifest_slides = Vec::with_capacity(slides.len());

    for slide in slides {
        let ext = slide
            .image_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png");
        let file = format!("slide_{:02}.{ext}", slide.index);
        let dest = slide_dir.join(&file);
        if slide.image_path != dest {
            tokio::fs::copy(&slide.image_path, &dest)
                .await
                .map_err(|e| PipelineError::Assembly {
                    path: slide.image_path.clone(),
                    source: e,
                })?;
        }

        deck.push_str(&format!(
            "## Slide {}\n\n![slide {}](slides/{file})\n",
            slide.index + 1,
            slide.index + 1
        ));
        if slide.degraded {
            deck.push_str("\n_placeholder: this slide could not be rendered_\n");
        }
        deck.push('\n');

        manifest_slides.push(ManifestSlide {
            index: slide.index,
            file,
            degraded: slide.degraded,
            from_cache: slide.from_cache,
        });
    }

    tokio::fs::write(output_dir.join("deck.md"), deck).await?;

    let manifest = DeckManifest {
        run_id,
        title,
        created_at: Utc::now(),
        slides: manifest_slides,
    };
    let manifest_path = output_dir.join("manifest.json");
    let body = serde_json::to_vec_pretty(&manifest)?;
    tokio::fs::write(&manifest_path, body).await?;
    tracing::info!(
        dir = %output_dir.display(),
        slides = slides.len(),
        "deck assembled"
    );
    Ok(manifest_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slide(index: usize, path: PathBuf, degraded: bool) -> RenderedSlide {
        RenderedSlide {
            index,
            image_path: path,
            prompt: format!("prompt {index}"),
            model_id: "mock-image".into(),
            from_cache: false,
            degraded,
        }
    }

    #[tokio::test]
    async fn test_write_deck_collects_images() {
        let dir = tempfile::tempdir().unwrap();
        let cache_side = dir.path().join("cache");
        std::fs::create_dir_all(&cache_side).unwrap();
        let img0 = cache_side.join("abc.png");
        let img1 = cache_side.join("def.png");
        std::fs::write(&img0, b"first").unwrap();
        std::fs::write(&img1, b"second").unwrap();

        let out = dir.path().join("out");
        let slides = vec![slide(0, img0, false), slide(1, img1, false)];
        let manifest_path = write_deck(&out, "My Deck", "run-1", &slides).await.unwrap();

        assert_eq!(
            std::fs::read(out.join("slides").join("slide_00.png")).unwrap(),
            b"first"
        );
        assert_eq!(
            std::fs::read(out.join("slides").join("slide_01.png")).unwrap(),
            b"second"
        );
        let deck = std::fs::read_to_string(out.join("deck.md")).unwrap();
        assert!(deck.starts_with("# My Deck"));
        assert!(deck.contains("slides/slide_00.png"));
        assert!(!deck.contains("placeholder"));

        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(manifest_path).unwrap()).unwrap();
        assert_eq!(manifest["run_id"], "run-1");
        assert_eq!(manifest["slides"].as_array().unwrap().len(), 2);
        assert_eq!(manifest["slides"][1]["file"], "slide_01.png");
    }

    #[tokio::test]
    async fn test_placeholder_already_in_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let slide_dir = out.join("slides");
        std::fs::create_dir_all(&slide_dir).unwrap();
        let placeholder = slide_dir.join("slide_01_placeholder.svg");
        std::fs::write(&placeholder, b"<svg/>").unwrap();

        let good = dir.path().join("good.png");
        std::fs::write(&good, b"img").unwrap();

        let slides = vec![slide(0, good, false), slide(1, placeholder, true)];
        write_deck(&out, "Deck", "run-2", &slides).await.unwrap();

        assert!(slide_dir.join("slide_01.svg").exists());
        let deck = std::fs::read_to_string(out.join("deck.md")).unwrap();
        assert!(deck.contains("slides/slide_01.svg"));
        assert!(deck.contains("_placeholder: this slide could not be rendered_"));
    }
}
