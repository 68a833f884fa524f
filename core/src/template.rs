//! Deck templates: a named slide-type sequence plus narrative and styling
//! hints. Three builtins ship with the binary; a template directory can
//! overlay or extend them with YAML files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use deckgen_common::{SlideType, SuggestedRange, TemplateSpec, TemplateStyleHints};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("unknown template: {id}")]
    Unknown { id: String },

    #[error("invalid template file {path}: {reason}")]
    InvalidFile { path: PathBuf, reason: String },

    #[error("invalid template {id}: {reason}")]
    Invalid { id: String, reason: String },

    #[error("template IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct TemplateRegistry {
    templates: HashMap<String, TemplateSpec>,
    dir: Option<PathBuf>,
}

impl TemplateRegistry {
    /// Registry with only the builtin templates.
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();
        for spec in builtin_templates() {
            templates.insert(spec.id.clone(), spec);
        }
        Self {
            templates,
            dir: None,
        }
    }

    /// Registry that overlays builtins with YAML files from `dir`.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Result<Self, TemplateError> {
        let mut registry = Self::builtin();
        registry.dir = Some(dir.into());
        registry.reload()?;
        Ok(registry)
    }

    /// Re-read the overlay directory. Files that share an id with a builtin
    /// replace it.
    pub fn reload(&mut self) -> Result<(), TemplateError> {
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };
        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "template directory missing, using builtins only");
            return Ok(());
        }
        let mut loaded = 0usize;
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .is_some_and(|e| e == "yaml" || e == "yml");
            if !is_yaml {
                continue;
            }
            let spec = load_template_file(&path)?;
            validate(&spec)?;
            tracing::debug!(id = %spec.id, path = %path.display(), "loaded template");
            self.templates.insert(spec.id.clone(), spec);
            loaded += 1;
        }
        tracing::info!(loaded, total = self.templates.len(), "template registry ready");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&TemplateSpec, TemplateError> {
        self.templates.get(id).ok_or_else(|| TemplateError::Unknown {
            id: id.to_string(),
        })
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &TemplateSpec> {
        self.templates.values()
    }
}

fn load_template_file(path: &Path) -> Result<TemplateSpec, TemplateError> {
    let raw = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&raw).map_err(|e| TemplateError::InvalidFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn validate(spec: &TemplateSpec) -> Result<(), TemplateError> {
    if spec.id.trim().is_empty() {
        return Err(TemplateError::Invalid {
            id: spec.id.clone(),
            reason: "empty id".into(),
        });
    }
    if spec.sequence.is_empty() {
        return Err(TemplateError::Invalid {
            id: spec.id.clone(),
            reason: "empty slide sequence".into(),
        });
    }
    if spec.suggested_slides.min == 0 || spec.suggested_slides.min > spec.suggested_slides.max {
        return Err(TemplateError::Invalid {
            id: spec.id.clone(),
            reason: format!(
                "bad suggested range {}..{}",
                spec.suggested_slides.min, spec.suggested_slides.max
            ),
        });
    }
    Ok(())
}

fn builtin_templates() -> Vec<TemplateSpec> {
    vec![
        TemplateSpec {
            id: "standard".into(),
            name: "Standard".into(),
            description: "Title, agenda, content body, closing call to action".into(),
            sequence: vec![
                SlideType::Title,
                SlideType::Toc,
                SlideType::Content,
                SlideType::Content,
                SlideType::Content,
                SlideType::ConclusionCta,
            ],
            narrative: "problem-solution".into(),
            suggested_slides: SuggestedRange { min: 5, max: 8 },
            style_hints: TemplateStyleHints {
                background: Some("clean light background with generous margins".into()),
                typography: Some("bold sans-serif headings, readable body text".into()),
                colors: vec!["#1a73e8".into(), "#202124".into(), "#ffffff".into()],
                layout: Some("left-aligned headings, bulleted body".into()),
                visual: Some("simple flat iconography".into()),
                special: None,
            },
        },
        TemplateSpec {
            id: "minimal".into(),
            name: "Minimal".into(),
            description: "Short deck that gets straight to the point".into(),
            sequence: vec![
                SlideType::Title,
                SlideType::Content,
                SlideType::Content,
                SlideType::ConclusionCta,
            ],
            narrative: "direct".into(),
            suggested_slides: SuggestedRange { min: 3, max: 5 },
            style_hints: TemplateStyleHints {
                background: Some("plain white or near-white".into()),
                typography: Some("large type, few words per slide".into()),
                colors: vec!["#111111".into(), "#fafafa".into()],
                layout: Some("centered focal statements".into()),
                visual: Some("no decoration beyond the content itself".into()),
                special: None,
            },
        },
        TemplateSpec {
            id: "deep-dive".into(),
            name: "Deep Dive".into(),
            description: "Longer technical walkthrough with a data slide".into(),
            sequence: vec![
                SlideType::Title,
                SlideType::Toc,
                SlideType::Content,
                SlideType::Content,
                SlideType::Chart,
                SlideType::Content,
                SlideType::ConclusionCta,
            ],
            narrative: "evidence-led walkthrough".into(),
            suggested_slides: SuggestedRange { min: 6, max: 12 },
            style_hints: TemplateStyleHints {
                background: Some("dark background with high-contrast text".into()),
                typography: Some("technical sans-serif, monospace for identifiers".into()),
                colors: vec!["#0b1220".into(), "#38bdf8".into(), "#f97316".into()],
                layout: Some("dense but gridded, room for diagrams".into()),
                visual: Some("diagrams and charts preferred over stock imagery".into()),
                special: Some("one chart slide presenting quantitative evidence".into()),
            },
        },
    ]
}
