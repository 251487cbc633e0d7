//! Response Dispatcher - Content Types, Dispositions, Status Envelopes
//!
//! Dispatch builds complete `http::Response` values. It never chooses a
//! status line: every response leaves the builder default and the request
//! handler adjusts it when it needs to.

use std::fs;
use std::path::Path;

use http::header::{
    HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE, ETAG,
};
use http::Response;
use serde::Serialize;

use crate::config::{CorsConfig, ViewConfig};
use crate::envelope::ResponseEnvelope;
use crate::error::ViewError;
use crate::hashing::etag;
use crate::markup::{RenderedOutput, SafeHtml};
use crate::source::lookup_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Json,
    Csv,
    Calendar,
    Spreadsheet,
    Pdf,
    Binary,
}

impl ContentKind {
    pub fn content_type(self) -> Option<&'static str> {
        match self {
            Self::Html => Some("text/html"),
            Self::Json => Some("application/json"),
            Self::Csv => Some("text/csv"),
            Self::Calendar => Some("text/calendar"),
            Self::Spreadsheet => Some("application/vnd.ms-excel"),
            Self::Pdf => Some("application/pdf"),
            Self::Binary => None,
        }
    }

    pub fn disposition(self, filename: Option<&str>) -> Option<String> {
        match self {
            Self::Html | Self::Json => Some("inline".to_string()),
            Self::Csv | Self::Calendar | Self::Spreadsheet => Some(match filename {
                Some(name) => format!("attachment; filename={}", name),
                None => "attachment".to_string(),
            }),
            Self::Pdf => Some(match filename {
                Some(name) => format!("inline; filename={}", name),
                None => "inline".to_string(),
            }),
            Self::Binary => None,
        }
    }

    fn carries_etag(self) -> bool {
        matches!(self, Self::Html | Self::Pdf)
    }
}

pub type ViewResponse = Response<Vec<u8>>;

#[derive(Debug, Clone)]
pub struct ResponseDispatcher {
    cors: CorsConfig,
    etag: bool,
}

impl Default for ResponseDispatcher {
    fn default() -> Self {
        Self::new(CorsConfig::default())
    }
}

impl ResponseDispatcher {
    pub fn new(cors: CorsConfig) -> Self {
        Self { cors, etag: true }
    }

    pub fn from_config(config: &ViewConfig) -> Self {
        Self {
            cors: config.cors.clone(),
            etag: config.etag,
        }
    }

    pub fn with_etag(mut self, enabled: bool) -> Self {
        self.etag = enabled;
        self
    }

    // --- Rendered markup ---

    pub fn html(&self, output: RenderedOutput) -> Result<ViewResponse, ViewError> {
        self.respond(ContentKind::Html, None, output.into_bytes())
    }

    pub fn html_safe(&self, html: SafeHtml) -> Result<ViewResponse, ViewError> {
        self.respond(ContentKind::Html, None, html.into_string().into_bytes())
    }

    // --- JSON and the status protocol ---

    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<ViewResponse, ViewError> {
        let body = serde_json::to_vec(value)?;
        self.respond(ContentKind::Json, None, body)
    }

    /// Envelopes are per-response state and are never cached
    pub fn envelope(&self, envelope: &ResponseEnvelope) -> Result<ViewResponse, ViewError> {
        let mut response = self.json(envelope)?;
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        tracing::debug!(status_code = envelope.status_code().code(), "status envelope");
        Ok(response)
    }

    pub fn report_success(&self) -> Result<ViewResponse, ViewError> {
        self.envelope(&ResponseEnvelope::success())
    }

    pub fn report_error(&self, detail: impl Into<String>) -> Result<ViewResponse, ViewError> {
        self.envelope(&ResponseEnvelope::error(detail))
    }

    pub fn report_errors<I, S>(&self, details: I) -> Result<ViewResponse, ViewError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.envelope(&ResponseEnvelope::errors(details))
    }

    pub fn report_message(&self, text: impl Into<String>) -> Result<ViewResponse, ViewError> {
        self.envelope(&ResponseEnvelope::message(text))
    }

    pub fn report_redirect(&self, target: impl Into<String>) -> Result<ViewResponse, ViewError> {
        self.envelope(&ResponseEnvelope::redirect(target))
    }

    pub fn report_success_redirect(&self, target: impl Into<String>) -> Result<ViewResponse, ViewError> {
        self.envelope(&ResponseEnvelope::success_redirect(target))
    }

    pub fn report_reload(&self) -> Result<ViewResponse, ViewError> {
        self.envelope(&ResponseEnvelope::reload())
    }

    // --- Downloads ---

    /// Encode `records` as CSV rows
    pub fn csv<I, R, F>(&self, filename: &str, records: I) -> Result<ViewResponse, ViewError>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in records {
            writer.write_record(record)?;
        }
        let body = writer
            .into_inner()
            .map_err(|e| ViewError::Csv(csv::Error::from(e.into_error())))?;
        self.respond(ContentKind::Csv, Some(filename), body)
    }

    pub fn calendar(&self, filename: &str, body: impl Into<Vec<u8>>) -> Result<ViewResponse, ViewError> {
        self.respond(ContentKind::Calendar, Some(filename), body.into())
    }

    pub fn spreadsheet(&self, filename: &str, body: impl Into<Vec<u8>>) -> Result<ViewResponse, ViewError> {
        self.respond(ContentKind::Spreadsheet, Some(filename), body.into())
    }

    /// Read the whole file before building anything, so a failed read
    /// never yields a truncated download
    pub fn pdf_file(&self, path: &Path) -> Result<ViewResponse, ViewError> {
        let body = fs::read(path).map_err(|e| ViewError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let display = path.to_string_lossy();
        let filename = lookup_name(&display);
        tracing::debug!(path = %path.display(), bytes = body.len(), "pdf read");
        self.respond(ContentKind::Pdf, Some(filename), body)
    }

    pub fn pdf_bytes(&self, filename: &str, body: impl Into<Vec<u8>>) -> Result<ViewResponse, ViewError> {
        self.respond(ContentKind::Pdf, Some(filename), body.into())
    }

    /// Raw bytes with no metadata at all
    pub fn binary(&self, body: impl Into<Vec<u8>>) -> Result<ViewResponse, ViewError> {
        self.respond(ContentKind::Binary, None, body.into())
    }

    fn respond(
        &self,
        kind: ContentKind,
        filename: Option<&str>,
        body: Vec<u8>,
    ) -> Result<ViewResponse, ViewError> {
        let mut builder = Response::builder();
        if let Some(content_type) = kind.content_type() {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Some(disposition) = kind.disposition(filename) {
            builder = builder.header(CONTENT_DISPOSITION, header_value(&disposition)?);
        }
        for (name, value) in self.cors_headers(kind) {
            builder = builder.header(name, header_value(value)?);
        }
        if self.etag && kind.carries_etag() {
            builder = builder.header(ETAG, header_value(&etag(&body))?);
        }
        builder.body(body).map_err(|e| ViewError::Header(e.to_string()))
    }

    fn cors_headers(&self, kind: ContentKind) -> Vec<(HeaderName, &str)> {
        let mut headers = Vec::new();
        if kind == ContentKind::Binary {
            return headers;
        }
        if matches!(kind, ContentKind::Html | ContentKind::Json) {
            headers.push((ACCESS_CONTROL_ALLOW_ORIGIN, self.cors.allow_origin.as_str()));
        }
        if kind == ContentKind::Json {
            headers.push((ACCESS_CONTROL_ALLOW_METHODS, self.cors.allow_methods.as_str()));
        }
        if self.cors.allow_credentials {
            headers.push((ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"));
        }
        headers
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ViewError> {
    HeaderValue::from_str(value).map_err(|_| ViewError::Header(format!("{:?} is not a valid header value", value)))
}
