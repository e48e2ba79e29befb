use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub extraction: Option<ExtractionConfig>,
    pub viewer: Option<ViewerFileConfig>,
    pub viewport: Option<ViewportFileConfig>,
    pub library: Option<LibraryConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewerFileConfig {
    pub default_scale: Option<f32>,
    pub zoom_step: Option<f32>,
    pub min_scale: Option<f32>,
    pub max_scale: Option<f32>,
    pub device_pixel_ratio: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewportFileConfig {
    pub max_width: Option<f32>,
    pub max_height: Option<f32>,
    pub max_fraction: Option<f32>,
    pub min_width: Option<f32>,
    pub min_height: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub path: Option<String>,
}

/// Platform config directory path: `<config_dir>/citedoc/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("citedoc").join("config.toml"))
}

/// Load config by cascading CWD `.citedoc.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".citedoc.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
            None
        }
    }
}

/// Pick the overlay's value for a field, falling back to the base.
macro_rules! pick {
    ($base:expr, $overlay:expr, $section:ident . $field:ident) => {
        $overlay
            .$section
            .as_ref()
            .and_then(|s| s.$field.clone())
            .or_else(|| $base.$section.as_ref().and_then(|s| s.$field.clone()))
    };
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        extraction: Some(ExtractionConfig {
            max_pages: pick!(base, overlay, extraction.max_pages),
        }),
        viewer: Some(ViewerFileConfig {
            default_scale: pick!(base, overlay, viewer.default_scale),
            zoom_step: pick!(base, overlay, viewer.zoom_step),
            min_scale: pick!(base, overlay, viewer.min_scale),
            max_scale: pick!(base, overlay, viewer.max_scale),
            device_pixel_ratio: pick!(base, overlay, viewer.device_pixel_ratio),
        }),
        viewport: Some(ViewportFileConfig {
            max_width: pick!(base, overlay, viewport.max_width),
            max_height: pick!(base, overlay, viewport.max_height),
            max_fraction: pick!(base, overlay, viewport.max_fraction),
            min_width: pick!(base, overlay, viewport.min_width),
            min_height: pick!(base, overlay, viewport.min_height),
        }),
        library: Some(LibraryConfig {
            path: pick!(base, overlay, library.path),
        }),
    }
}
