//! Error taxonomy shared by compiler, composer and dispatcher.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("Template root {} is not a readable directory: {reason}", .path.display())]
    Discovery { path: PathBuf, reason: String },

    #[error("Template syntax error in {source_name}{}: {message}", format_line(.line))]
    TemplateSyntax {
        source_name: String,
        line: Option<usize>,
        message: String,
    },

    #[error("Template execution failed in {template}: {source}")]
    TemplateExecution {
        template: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Could not read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid response header: {0}")]
    Header(String),
}

impl ViewError {
    /// Deploy-time defects: the catalog cannot be built at all.
    pub fn is_compile_time(&self) -> bool {
        matches!(self, Self::Discovery { .. } | Self::TemplateSyntax { .. })
    }

    pub(crate) fn syntax(source_name: impl Into<String>, err: &minijinja::Error) -> Self {
        Self::TemplateSyntax {
            source_name: err
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| source_name.into()),
            line: err.line(),
            message: err
                .detail()
                .map(str::to_string)
                .unwrap_or_else(|| err.kind().to_string()),
        }
    }

    /// Maps a render failure back into the taxonomy. Helpers that reject
    /// their arguments attach an `InvalidArgument` as the error source.
    pub(crate) fn execution(template: impl Into<String>, err: minijinja::Error) -> Self {
        let mut cause: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(&err);
        while let Some(inner) = cause {
            if let Some(ViewError::InvalidArgument(msg)) = inner.downcast_ref::<ViewError>() {
                return Self::InvalidArgument(msg.clone());
            }
            cause = inner.source();
        }
        Self::TemplateExecution {
            template: template.into(),
            source: err,
        }
    }
}

fn format_line(line: &Option<usize>) -> String {
    match line {
        Some(line) => format!(" (line {})", line),
        None => String::new(),
    }
}
