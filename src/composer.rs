//! Template Composer - Four Call Shapes, One Execution Path
//!
//! `compose_with_layout`, `compose_fragment` and `compose_from_string`
//! compile fresh on every call; `compose_from_catalog` reuses a
//! precompiled unit. All of them render through `execute`.

use std::sync::Arc;

use minijinja::{Environment, ErrorKind, Value};
use serde::Serialize;

use crate::compiler::{TemplateCatalog, TemplateSetCompiler};
use crate::error::ViewError;
use crate::markup::{RenderedOutput, SafeHtml};
use crate::registry::FormatterRegistry;
use crate::source::TemplateSource;
use crate::DEFAULT_LAYOUT;

/// Lookup name given to inline markup
pub const INLINE_TEMPLATE_NAME: &str = "template";

#[derive(Debug)]
pub struct TemplateComposer {
    compiler: TemplateSetCompiler,
    default_layout: TemplateSource,
}

impl TemplateComposer {
    pub fn new(compiler: TemplateSetCompiler) -> Self {
        Self {
            compiler,
            default_layout: TemplateSource::file(DEFAULT_LAYOUT),
        }
    }

    /// Composer over a fresh compiler with default options
    pub fn with_registry(registry: Arc<FormatterRegistry>) -> Self {
        Self::new(TemplateSetCompiler::new(registry))
    }

    pub fn with_default_layout(mut self, layout: impl Into<TemplateSource>) -> Self {
        self.default_layout = layout.into();
        self
    }

    pub fn compiler(&self) -> &TemplateSetCompiler {
        &self.compiler
    }

    /// Compile `layout` with `fragments` and render the first fragment
    pub fn compose_with_layout<S>(
        &self,
        layout: impl Into<TemplateSource>,
        model: &S,
        fragments: &[TemplateSource],
    ) -> Result<RenderedOutput, ViewError>
    where
        S: Serialize + ?Sized,
    {
        let layout = layout.into();
        let mut sources = Vec::with_capacity(fragments.len() + 1);
        sources.push(layout.clone());
        sources.extend(fragments.iter().filter(|f| **f != layout).cloned());

        let key = fragments
            .first()
            .map(|f| f.name().to_string())
            .unwrap_or_else(|| layout.name().to_string());
        self.compiler.compile_unit(&key, &sources)?.render(model)
    }

    /// `compose_with_layout` against the configured default layout
    pub fn compose_page<S>(&self, model: &S, fragments: &[TemplateSource]) -> Result<RenderedOutput, ViewError>
    where
        S: Serialize + ?Sized,
    {
        self.compose_with_layout(self.default_layout.clone(), model, fragments)
    }

    /// Compile fragments without a layout. The entry is the lookup name of
    /// the first fragment. Fails before any I/O when none are given.
    pub fn compose_fragment<S>(&self, model: &S, fragments: &[TemplateSource]) -> Result<RenderedOutput, ViewError>
    where
        S: Serialize + ?Sized,
    {
        let first = fragments
            .first()
            .ok_or_else(|| ViewError::InvalidArgument("no templates supplied".to_string()))?;
        self.compiler
            .compile_standalone(first.name(), fragments)?
            .render(model)
    }

    /// Compile and render inline markup; never touches the filesystem
    pub fn compose_from_string<S>(&self, markup: &str, model: &S) -> Result<RenderedOutput, ViewError>
    where
        S: Serialize + ?Sized,
    {
        let source = TemplateSource::inline(INLINE_TEMPLATE_NAME, markup);
        self.compiler
            .compile_standalone(INLINE_TEMPLATE_NAME, std::slice::from_ref(&source))?
            .render(model)
    }

    /// Render a precompiled unit by key
    pub fn compose_from_catalog<S>(
        &self,
        catalog: &TemplateCatalog,
        key: &str,
        model: &S,
    ) -> Result<RenderedOutput, ViewError>
    where
        S: Serialize + ?Sized,
    {
        catalog.render(key, model)
    }

    /// `compose_fragment` tagged for embedding in another page
    pub fn compose_fragment_html<S>(&self, model: &S, fragments: &[TemplateSource]) -> Result<SafeHtml, ViewError>
    where
        S: Serialize + ?Sized,
    {
        Ok(self.compose_fragment(model, fragments)?.into_html())
    }

    /// `compose_from_string` tagged for embedding in another page
    pub fn compose_from_string_html<S>(&self, markup: &str, model: &S) -> Result<SafeHtml, ViewError>
    where
        S: Serialize + ?Sized,
    {
        Ok(self.compose_from_string(markup, model)?.into_html())
    }
}

/// Execute `entry` in `env` against `model`
pub(crate) fn execute<S>(env: &Environment<'_>, entry: &str, model: &S) -> Result<RenderedOutput, ViewError>
where
    S: Serialize + ?Sized,
{
    let template = env.get_template(entry).map_err(|e| match e.kind() {
        ErrorKind::TemplateNotFound => ViewError::TemplateNotFound(entry.to_string()),
        _ => ViewError::execution(entry, e),
    })?;
    let body = template
        .render(Value::from_serialize(model))
        .map_err(|e| ViewError::execution(entry, e))?;
    Ok(RenderedOutput::new(entry, body))
}
