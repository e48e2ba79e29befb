use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod answer;
pub mod config_file;
pub mod engine;
pub mod extract;
pub mod library;
pub mod render;
pub mod resolver;
pub mod store;
pub mod viewer;
pub mod viewport;

// Re-export for convenience
pub use answer::{AnswerRequest, AnswerResponse, CitationRecord};
pub use engine::{EngineError, PdfEngine, PdfHandle, PdfPage};
pub use extract::{ExtractOptions, ExtractedText, ExtractionError, extract_text};
pub use library::{Library, LibraryError};
pub use render::{PageRenderer, RenderOutcome, RenderTask, SessionState, ViewerError};
pub use resolver::{ResolveError, resolve_citation, resolve_view_target};
pub use store::{KvStore, MemoryStore, SqliteStore, StoreError};
pub use viewer::Viewer;
pub use viewport::{Point, Size, ViewportConfig, ViewportController, ZoomLevel};

/// A PDF stored in the library together with its page-tagged text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    /// Page-tagged text as produced by [`extract_text`].
    pub content: String,
    pub byte_size: u64,
    pub uploaded_at: DateTime<Utc>,
    /// Original file bytes. Never mutated; shared with every viewer session.
    #[serde(with = "base64_bytes")]
    pub raw_bytes: Arc<[u8]>,
}

impl Document {
    pub fn new(name: impl Into<String>, content: String, raw_bytes: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            content,
            byte_size: raw_bytes.len() as u64,
            uploaded_at: Utc::now(),
            raw_bytes: raw_bytes.into(),
        }
    }
}

/// A source reference returned alongside an AI answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    /// Loosely formatted document name; not guaranteed to match a stored name.
    pub document_name_hint: String,
    pub clause: String,
    pub page: Option<u32>,
}

impl Citation {
    pub fn new(document_name_hint: impl Into<String>, clause: impl Into<String>) -> Self {
        Self {
            document_name_hint: document_name_hint.into(),
            clause: clause.into(),
            page: None,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }
}

/// A resolved citation ready to be displayed.
#[derive(Debug, Clone)]
pub struct ViewTarget {
    pub document_name: String,
    pub clause: String,
    pub raw_bytes: Arc<[u8]>,
    /// 1-based page to show first.
    pub page: u32,
}

/// Rendering parameters for the viewer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerConfig {
    pub default_scale: f32,
    pub zoom_step: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    /// Display pixel density; backing surfaces are this many times larger
    /// than their logical size.
    pub device_pixel_ratio: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            default_scale: 1.5,
            zoom_step: 0.25,
            min_scale: 0.5,
            max_scale: 3.0,
            device_pixel_ratio: 1.0,
        }
    }
}

/// Runtime configuration, resolved from [`config_file::ConfigFile`] over defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub extraction: ExtractOptions,
    pub viewer: ViewerConfig,
    pub viewport: ViewportConfig,
    /// Directory of the persistent library. `None` means [`default_library_path`].
    pub library_path: Option<PathBuf>,
}

impl Config {
    /// Apply the values present in `file` over the defaults.
    pub fn from_file(file: &config_file::ConfigFile) -> Self {
        let mut config = Config::default();

        if let Some(extraction) = &file.extraction
            && let Some(max_pages) = extraction.max_pages
        {
            config.extraction = ExtractOptions::new(max_pages);
        }

        if let Some(viewer) = &file.viewer {
            let v = &mut config.viewer;
            v.default_scale = viewer.default_scale.unwrap_or(v.default_scale);
            v.zoom_step = viewer.zoom_step.unwrap_or(v.zoom_step);
            v.min_scale = viewer.min_scale.unwrap_or(v.min_scale);
            v.max_scale = viewer.max_scale.unwrap_or(v.max_scale);
            v.device_pixel_ratio = viewer.device_pixel_ratio.unwrap_or(v.device_pixel_ratio);
        }

        if let Some(viewport) = &file.viewport {
            let v = &mut config.viewport;
            v.max_width = viewport.max_width.unwrap_or(v.max_width);
            v.max_height = viewport.max_height.unwrap_or(v.max_height);
            v.max_fraction = viewport.max_fraction.unwrap_or(v.max_fraction);
            v.min_width = viewport.min_width.unwrap_or(v.min_width);
            v.min_height = viewport.min_height.unwrap_or(v.min_height);
        }

        config.library_path = file
            .library
            .as_ref()
            .and_then(|l| l.path.as_ref())
            .map(PathBuf::from);

        config
    }

    pub fn library_path(&self) -> Option<PathBuf> {
        self.library_path.clone().or_else(default_library_path)
    }
}

/// Platform data directory for the library: `<data_dir>/citedoc/library`.
pub fn default_library_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("citedoc").join("library"))
}

mod base64_bytes {
    use std::sync::Arc;

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Arc<[u8]>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Arc<[u8]>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Arc::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_file::{ConfigFile, ExtractionConfig, LibraryConfig, ViewerFileConfig};

    #[test]
    fn document_serde_keeps_bytes() {
        let doc = Document::new("EN-50128.pdf", "[Page 1] hello".into(), vec![0, 1, 2, 255]);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["raw_bytes"], "AAEC/w==");

        let back: Document = serde_json::from_value(json).unwrap();
        assert_eq!(&*back.raw_bytes, &[0, 1, 2, 255]);
        assert_eq!(back.byte_size, 4);
        assert_eq!(back.id, doc.id);
    }

    #[test]
    fn config_defaults_without_file() {
        let config = Config::from_file(&ConfigFile::default());
        assert_eq!(config.extraction.max_pages, 50);
        assert_eq!(config.viewer, ViewerConfig::default());
        assert!(config.library_path.is_none());
    }

    #[test]
    fn config_file_values_override_defaults() {
        let file = ConfigFile {
            extraction: Some(ExtractionConfig {
                max_pages: Some(10),
            }),
            viewer: Some(ViewerFileConfig {
                device_pixel_ratio: Some(2.0),
                ..Default::default()
            }),
            library: Some(LibraryConfig {
                path: Some("/tmp/citedoc-lib".into()),
            }),
            ..Default::default()
        };
        let config = Config::from_file(&file);
        assert_eq!(config.extraction.max_pages, 10);
        assert_eq!(config.viewer.device_pixel_ratio, 2.0);
        assert_eq!(config.viewer.default_scale, 1.5);
        assert_eq!(
            config.library_path(),
            Some(PathBuf::from("/tmp/citedoc-lib"))
        );
    }
}
