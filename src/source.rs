//! Template Sources - Where Markup Comes From
//!
//! A source is either a file on disk or an inline string. Sources are read
//! at compile time only; a compiled catalog never touches the filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::ViewError;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static SOURCE_READ_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_source_read_count() -> u32 {
    SOURCE_READ_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_source_read_count() {
    SOURCE_READ_COUNT.store(0, Ordering::SeqCst);
}

/// Where a source's markup lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    File(PathBuf),
    Inline(String),
}

/// One template source, named the way other templates refer to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    name: String,
    origin: SourceOrigin,
}

impl TemplateSource {
    /// File source named by the last segment of its path
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = lookup_name(&path.to_string_lossy()).to_string();
        Self {
            name,
            origin: SourceOrigin::File(path),
        }
    }

    /// File source with an explicit lookup name (tree discovery uses the relative path)
    pub fn file_named(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            origin: SourceOrigin::File(path.into()),
        }
    }

    pub fn inline(name: impl Into<String>, markup: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: SourceOrigin::Inline(markup.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &SourceOrigin {
        &self.origin
    }

    /// Read the markup. An unreadable file is reported as a syntax error
    /// against the source, since the unit it belongs to cannot be parsed.
    pub fn load(&self) -> Result<String, ViewError> {
        match &self.origin {
            SourceOrigin::Inline(markup) => Ok(markup.clone()),
            SourceOrigin::File(path) => {
                #[cfg(feature = "test-hooks")]
                SOURCE_READ_COUNT.fetch_add(1, Ordering::SeqCst);

                fs::read_to_string(path).map_err(|e| ViewError::TemplateSyntax {
                    source_name: path.display().to_string(),
                    line: None,
                    message: format!("could not read template: {}", e),
                })
            }
        }
    }
}

impl From<&str> for TemplateSource {
    fn from(path: &str) -> Self {
        Self::file(path)
    }
}

impl From<String> for TemplateSource {
    fn from(path: String) -> Self {
        Self::file(path)
    }
}

impl From<PathBuf> for TemplateSource {
    fn from(path: PathBuf) -> Self {
        Self::file(path)
    }
}

impl From<&Path> for TemplateSource {
    fn from(path: &Path) -> Self {
        Self::file(path)
    }
}

/// Lifecycle of a source within one compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Unparsed,
    Parsed,
    /// Parsed, then shadowed by a later source with the same lookup name
    Replaced,
    Error,
}

/// Name a file source is registered under: the text after the last `/`
pub fn lookup_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Enumerates the template files under a root directory
pub trait TemplateDiscovery: Send + Sync {
    fn list_template_sources(&self, root: &Path) -> Result<Vec<TemplateSource>, ViewError>;
}

/// Recursive directory walk filtered by file extension
#[derive(Debug, Clone)]
pub struct FsDiscovery {
    extensions: Vec<String>,
}

impl FsDiscovery {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

impl Default for FsDiscovery {
    fn default() -> Self {
        Self::new(["html"])
    }
}

impl TemplateDiscovery for FsDiscovery {
    fn list_template_sources(&self, root: &Path) -> Result<Vec<TemplateSource>, ViewError> {
        if !root.is_dir() {
            return Err(ViewError::Discovery {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let mut sources = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| ViewError::Discovery {
                path: e.path().unwrap_or(root).to_path_buf(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() || !self.accepts(entry.path()) {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            sources.push(TemplateSource::file_named(relative, entry.path()));
        }

        tracing::debug!(root = %root.display(), count = sources.len(), "discovered templates");
        Ok(sources)
    }
}

/// Fixed in-memory listing, for tests and embedded template sets
#[derive(Debug, Clone, Default)]
pub struct MemoryDiscovery {
    sources: Vec<TemplateSource>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, markup: impl Into<String>) -> Self {
        self.sources.push(TemplateSource::inline(name, markup));
        self
    }
}

impl TemplateDiscovery for MemoryDiscovery {
    fn list_template_sources(&self, _root: &Path) -> Result<Vec<TemplateSource>, ViewError> {
        let mut sources = self.sources.clone();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sources)
    }
}
