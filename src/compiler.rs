//! Template Set Compiler - Isolated Units, One Registry
//!
//! Every set is parsed into its own environment from scratch, so helper
//! bindings and parse state never cross from one set to another even when
//! two sets share a layout file.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use minijinja::{AutoEscape, Environment, Error, Output, State, UndefinedBehavior, Value};
use serde::Serialize;

use crate::composer::execute;
use crate::error::ViewError;
use crate::formatters::escape_html;
use crate::hashing::fingerprint_sources;
use crate::markup::RenderedOutput;
use crate::references::check_helper_references;
use crate::registry::FormatterRegistry;
use crate::source::{FsDiscovery, SourceState, TemplateDiscovery, TemplateSource};

/// Composition helper rendering inline markup inside a running template
pub const RENDER_FRAGMENT: &str = "renderFragment";

/// One set descriptor: a lookup key and the fragments compiled with a layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    key: String,
    layout: Option<TemplateSource>,
    fragments: Vec<TemplateSource>,
}

impl TemplateSet {
    /// Set compiled with whatever layout the compiler is given
    pub fn new<I, S>(key: impl Into<String>, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TemplateSource>,
    {
        Self {
            key: key.into(),
            layout: None,
            fragments: fragments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a `(lookupKey, layoutPath, fragment1, fragment2, ...)` descriptor
    pub fn from_descriptor<S: AsRef<str>>(descriptor: &[S]) -> Result<Self, ViewError> {
        let (key, rest) = descriptor
            .split_first()
            .ok_or_else(|| ViewError::InvalidArgument("empty set descriptor".to_string()))?;
        let key = key.as_ref().trim();
        if key.is_empty() {
            return Err(ViewError::InvalidArgument("set descriptor has an empty lookup key".to_string()));
        }
        let (layout, fragments) = rest
            .split_first()
            .ok_or_else(|| ViewError::InvalidArgument(format!("set {} names no layout", key)))?;

        Ok(Self {
            key: key.to_string(),
            layout: Some(TemplateSource::file(layout.as_ref())),
            fragments: fragments.iter().map(|f| TemplateSource::file(f.as_ref())).collect(),
        })
    }

    pub fn with_layout(mut self, layout: impl Into<TemplateSource>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fragments(&self) -> &[TemplateSource] {
        &self.fragments
    }
}

/// Parse-time switches shared by every unit a compiler builds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub strict_undefined: bool,
    pub check_helpers: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            strict_undefined: false,
            check_helpers: true,
        }
    }
}

/// A compiled unit ready for repeated execution
#[derive(Debug, Clone)]
pub struct NamedTemplate {
    key: String,
    entry: String,
    sources: Vec<String>,
    states: Vec<SourceState>,
    fingerprint: String,
    registry: Arc<FormatterRegistry>,
    env: Arc<Environment<'static>>,
}

impl NamedTemplate {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Lookup name of the template executed for this unit
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Source lookup names in parse order
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Each source lookup name with the state it reached during compilation
    pub fn source_states(&self) -> impl Iterator<Item = (&str, SourceState)> + '_ {
        self.sources
            .iter()
            .map(String::as_str)
            .zip(self.states.iter().copied())
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn registry(&self) -> &Arc<FormatterRegistry> {
        &self.registry
    }

    pub fn render<S: Serialize + ?Sized>(&self, model: &S) -> Result<RenderedOutput, ViewError> {
        execute(&self.env, &self.entry, model)
    }
}

/// Lookup key to compiled unit
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, NamedTemplate>,
}

impl TemplateCatalog {
    pub fn get(&self, key: &str) -> Option<&NamedTemplate> {
        self.templates.get(key)
    }

    pub fn lookup(&self, key: &str) -> Result<&NamedTemplate, ViewError> {
        self.get(key)
            .ok_or_else(|| ViewError::TemplateNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn render<S: Serialize + ?Sized>(&self, key: &str, model: &S) -> Result<RenderedOutput, ViewError> {
        self.lookup(key)?.render(model)
    }
}

/// Builds catalogs and ad-hoc units against one shared registry
pub struct TemplateSetCompiler {
    registry: Arc<FormatterRegistry>,
    options: CompileOptions,
    discovery: Box<dyn TemplateDiscovery>,
}

impl TemplateSetCompiler {
    pub fn new(registry: Arc<FormatterRegistry>) -> Self {
        Self {
            registry,
            options: CompileOptions::default(),
            discovery: Box::new(FsDiscovery::default()),
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_discovery(mut self, discovery: impl TemplateDiscovery + 'static) -> Self {
        self.discovery = Box::new(discovery);
        self
    }

    pub fn registry(&self) -> &Arc<FormatterRegistry> {
        &self.registry
    }

    pub fn options(&self) -> CompileOptions {
        self.options
    }

    /// Compile each set with `layout` (unless the set names its own).
    /// The first failure aborts the whole build.
    pub fn compile_sets(
        &self,
        layout: &TemplateSource,
        sets: &[TemplateSet],
    ) -> Result<TemplateCatalog, ViewError> {
        let mut catalog = TemplateCatalog::default();
        for set in sets {
            if catalog.contains(&set.key) {
                return Err(ViewError::InvalidArgument(format!("duplicate set key: {}", set.key)));
            }
            let layout = set.layout.as_ref().unwrap_or(layout);
            let mut sources = vec![layout.clone()];
            sources.extend(set.fragments.iter().filter(|f| *f != layout).cloned());

            let unit = self.compile_unit(&set.key, &sources)?;
            catalog.templates.insert(set.key.clone(), unit);
        }

        tracing::info!(sets = catalog.len(), "template catalog built");
        Ok(catalog)
    }

    /// Compile every discovered file under `root` into one shared
    /// environment, keyed by path relative to `root`.
    pub fn compile_tree(&self, root: &Path) -> Result<TemplateCatalog, ViewError> {
        let sources = self.discovery.list_template_sources(root)?;
        let units = load_all(&sources)?;
        if self.options.check_helpers {
            check_helper_references(&units, |name| self.is_known(name))?;
        }

        let mut env = self.environment();
        for (name, markup) in &units {
            env.add_template_owned(name.clone(), markup.clone())
                .map_err(|e| ViewError::syntax(name.as_str(), &e))?;
        }
        let env = Arc::new(env);

        let templates = units
            .iter()
            .map(|(name, markup)| {
                let unit = NamedTemplate {
                    key: name.clone(),
                    entry: name.clone(),
                    sources: vec![name.clone()],
                    states: vec![SourceState::Parsed],
                    fingerprint: fingerprint_sources([(name.as_str(), markup.as_str())]),
                    registry: Arc::clone(&self.registry),
                    env: Arc::clone(&env),
                };
                (name.clone(), unit)
            })
            .collect();

        let catalog = TemplateCatalog { templates };
        tracing::info!(root = %root.display(), templates = catalog.len(), "template tree compiled");
        Ok(catalog)
    }

    /// Parse `sources` together. The entry is the first source after the
    /// layout, or the only source when there is just one.
    pub fn compile_unit(&self, key: &str, sources: &[TemplateSource]) -> Result<NamedTemplate, ViewError> {
        if sources.is_empty() {
            return Err(ViewError::InvalidArgument(format!("no templates supplied for {}", key)));
        }

        let mut states = vec![SourceState::Unparsed; sources.len()];
        let mut units = Vec::with_capacity(sources.len());
        for (idx, source) in sources.iter().enumerate() {
            match source.load() {
                Ok(markup) => units.push((source.name().to_string(), markup)),
                Err(e) => {
                    states[idx] = SourceState::Error;
                    tracing::debug!(key, source = source.name(), ?states, "template source unreadable");
                    return Err(e);
                }
            }
        }

        if self.options.check_helpers {
            check_helper_references(&units, |name| self.is_known(name))?;
        }

        let mut env = self.environment();
        for (idx, (name, markup)) in units.iter().enumerate() {
            if let Some(earlier) = units[..idx].iter().rposition(|(n, _)| n == name) {
                states[earlier] = SourceState::Replaced;
                tracing::warn!(key, source = %name, "duplicate lookup name; later source replaces earlier");
            }
            if let Err(e) = env.add_template_owned(name.clone(), markup.clone()) {
                states[idx] = SourceState::Error;
                tracing::debug!(key, source = %name, ?states, "template parse failed");
                return Err(ViewError::syntax(name.as_str(), &e));
            }
            states[idx] = SourceState::Parsed;
        }

        let entry = units
            .get(1)
            .unwrap_or(&units[0])
            .0
            .clone();
        let fingerprint = fingerprint_sources(units.iter().map(|(n, m)| (n.as_str(), m.as_str())));
        tracing::debug!(key, entry = %entry, sources = units.len(), ?states, "compiled template set");

        Ok(NamedTemplate {
            key: key.to_string(),
            entry,
            sources: units.into_iter().map(|(name, _)| name).collect(),
            states,
            fingerprint,
            registry: Arc::clone(&self.registry),
            env: Arc::new(env),
        })
    }

    /// Compile the units without a layout; the first source is the entry
    pub(crate) fn compile_standalone(
        &self,
        key: &str,
        sources: &[TemplateSource],
    ) -> Result<NamedTemplate, ViewError> {
        let mut unit = self.compile_unit(key, sources)?;
        unit.entry = unit.sources[0].clone();
        Ok(unit)
    }

    fn is_known(&self, name: &str) -> bool {
        name == RENDER_FRAGMENT || self.registry.contains(name)
    }

    /// Fresh environment with autoescaping, the registry and composition helpers
    fn environment(&self) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_name: &str| AutoEscape::Html);
        env.set_undefined_behavior(if self.options.strict_undefined {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Lenient
        });
        env.set_formatter(escape_output);
        self.registry.install(&mut env);
        env.add_function(RENDER_FRAGMENT, render_fragment);
        env
    }
}

impl std::fmt::Debug for TemplateSetCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateSetCompiler")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish()
    }
}

fn load_all(sources: &[TemplateSource]) -> Result<Vec<(String, String)>, ViewError> {
    sources
        .iter()
        .map(|s| Ok((s.name().to_string(), s.load()?)))
        .collect()
}

/// Output formatter: trusted values pass through, everything else goes
/// through `escape_html` (`/` is left alone)
fn escape_output(out: &mut Output, state: &State, value: &Value) -> Result<(), Error> {
    if value.is_safe() || matches!(state.auto_escape(), AutoEscape::None) {
        return minijinja::escape_formatter(out, state, value);
    }
    match value.as_str() {
        Some(s) => out.write_str(&escape_html(s))?,
        None => out.write_str(&escape_html(&value.to_string()))?,
    }
    Ok(())
}

fn render_fragment(state: &State, markup: String, model: Option<Value>) -> Result<Value, Error> {
    let rendered = state
        .env()
        .render_str(&markup, model.unwrap_or(Value::UNDEFINED))?;
    Ok(Value::from_safe_string(rendered))
}

/// Published catalog, replaced wholesale on reload
#[derive(Debug)]
pub struct CatalogHandle {
    current: RwLock<Arc<TemplateCatalog>>,
}

impl CatalogHandle {
    pub fn new(catalog: TemplateCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Snapshot of the published catalog; unaffected by later publishes
    pub fn current(&self) -> Arc<TemplateCatalog> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Swap in a new catalog, returning the one it replaced
    pub fn publish(&self, catalog: TemplateCatalog) -> Arc<TemplateCatalog> {
        let next = Arc::new(catalog);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *guard, next);
        tracing::info!(templates = guard.len(), "template catalog published");
        previous
    }

    /// Build a replacement and publish it. On failure the published catalog
    /// stays in place and the error is returned.
    pub fn reload<F>(&self, build: F) -> Result<Arc<TemplateCatalog>, ViewError>
    where
        F: FnOnce() -> Result<TemplateCatalog, ViewError>,
    {
        match build() {
            Ok(catalog) => {
                self.publish(catalog);
                Ok(self.current())
            }
            Err(e) => {
                tracing::warn!(error = %e, "catalog reload failed; keeping previous catalog");
                Err(e)
            }
        }
    }
}
