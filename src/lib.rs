//! Viewsmith Core - Server-Side View Rendering
//!
//! # Flow
//! 1. One `FormatterRegistry`, built once, shared read-only
//! 2. Template sets compile into a `TemplateCatalog` of isolated units
//! 3. The composer renders units, ad-hoc fragments and inline markup
//! 4. The dispatcher turns output into typed responses and status envelopes

pub mod compiler;
pub mod composer;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod formatters;
pub mod hashing;
pub mod markup;
pub mod references;
pub mod registry;
pub mod source;

use std::sync::Arc;

pub use compiler::{CatalogHandle, CompileOptions, NamedTemplate, TemplateCatalog, TemplateSet, TemplateSetCompiler};
pub use composer::TemplateComposer;
pub use config::{CorsConfig, SetConfig, ViewConfig};
pub use dispatch::{ContentKind, ResponseDispatcher, ViewResponse};
pub use envelope::{ResponseEnvelope, StatusCode};
pub use error::ViewError;
pub use hashing::canonical_json;
pub use markup::{RenderedOutput, SafeHtml};
pub use registry::FormatterRegistry;
pub use source::{lookup_name, FsDiscovery, MemoryDiscovery, TemplateDiscovery, TemplateSource};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Layout used when a page names none
pub const DEFAULT_LAYOUT: &str = "views/master.html";

/// Registry configured with the display timezone from `config`
pub fn build_registry(config: &ViewConfig) -> Arc<FormatterRegistry> {
    Arc::new(FormatterRegistry::build_with_timezone(&config.display_timezone))
}

/// Compiler carrying the configured options and discovery extensions
pub fn build_compiler(config: &ViewConfig, registry: Arc<FormatterRegistry>) -> TemplateSetCompiler {
    TemplateSetCompiler::new(registry)
        .with_options(config.compile_options())
        .with_discovery(FsDiscovery::new(config.extensions.iter().cloned()))
}

/// Compile every configured set against the configured layout
pub fn build_catalog(config: &ViewConfig, registry: Arc<FormatterRegistry>) -> Result<TemplateCatalog, ViewError> {
    build_compiler(config, registry).compile_sets(&config.layout_source(), &config.set_descriptors())
}
