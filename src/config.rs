//! View configuration, loaded from TOML

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compiler::{CompileOptions, TemplateSet};
use crate::error::ViewError;
use crate::registry::DEFAULT_TIMEZONE;
use crate::source::TemplateSource;
use crate::DEFAULT_LAYOUT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_views_root")]
    pub views_root: PathBuf,
    #[serde(default = "default_layout")]
    pub layout: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_timezone")]
    pub display_timezone: String,
    #[serde(default)]
    pub strict_undefined: bool,
    #[serde(default = "default_true")]
    pub check_helpers: bool,
    #[serde(default)]
    pub sets: Vec<SetConfig>,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default = "default_true")]
    pub etag: bool,
}

fn default_views_root() -> PathBuf { PathBuf::from("views") }
fn default_layout() -> PathBuf { PathBuf::from(DEFAULT_LAYOUT) }
fn default_extensions() -> Vec<String> { vec!["html".to_string()] }
fn default_timezone() -> String { DEFAULT_TIMEZONE.to_string() }
fn default_true() -> bool { true }

/// One `[[sets]]` table: a lookup key and its fragment paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetConfig {
    pub key: String,
    #[serde(default)]
    pub templates: Vec<PathBuf>,
    /// Overrides the top-level layout for this set
    #[serde(default)]
    pub layout: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_allow_origin")]
    pub allow_origin: String,
    #[serde(default = "default_true")]
    pub allow_credentials: bool,
    #[serde(default = "default_allow_methods")]
    pub allow_methods: String,
}

fn default_allow_origin() -> String { "*".to_string() }
fn default_allow_methods() -> String { "POST, GET, OPTIONS, PUT, DELETE".to_string() }

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origin: default_allow_origin(),
            allow_credentials: true,
            allow_methods: default_allow_methods(),
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            views_root: default_views_root(),
            layout: default_layout(),
            extensions: default_extensions(),
            display_timezone: default_timezone(),
            strict_undefined: false,
            check_helpers: true,
            sets: Vec::new(),
            cors: CorsConfig::default(),
            etag: true,
        }
    }
}

impl ViewConfig {
    pub fn from_file(path: &Path) -> Result<Self, ViewError> {
        let content = fs::read_to_string(path).map_err(|e| ViewError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ViewError> {
        let config: Self = toml::from_str(content).map_err(|e| ViewError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ViewError> {
        if self.extensions.is_empty() {
            return Err(ViewError::Config("extensions must not be empty".to_string()));
        }
        for set in &self.sets {
            if set.key.trim().is_empty() {
                return Err(ViewError::Config("set key must not be empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn layout_source(&self) -> TemplateSource {
        TemplateSource::file(self.layout.clone())
    }

    /// Configured sets as compiler input
    pub fn set_descriptors(&self) -> Vec<TemplateSet> {
        self.sets
            .iter()
            .map(|s| {
                let set = TemplateSet::new(s.key.clone(), s.templates.iter().cloned());
                match &s.layout {
                    Some(layout) => set.with_layout(layout.clone()),
                    None => set,
                }
            })
            .collect()
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            strict_undefined: self.strict_undefined,
            check_helpers: self.check_helpers,
        }
    }
}
