//! Status Envelope - The Asynchronous Response Protocol
//!
//! Clients read `statusCode` first and dispatch on it; the payload field
//! that accompanies it is fixed per constructor.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Failure = 0,
    Success = 1,
    Reload = 5,
    Redirect = 6,
}

impl StatusCode {
    /// Unknown codes are failures
    pub fn from_code(code: u64) -> Self {
        match code {
            1 => Self::Success,
            5 => Self::Reload,
            6 => Self::Redirect,
            _ => Self::Failure,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        Ok(u64::try_from(code).map(Self::from_code).unwrap_or(Self::Failure))
    }
}

/// One response of the status protocol. At most one payload field is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    status_code: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    redirect_to: Option<String>,
}

impl ResponseEnvelope {
    fn bare(status_code: StatusCode) -> Self {
        Self {
            status_code,
            error: None,
            errors: None,
            msg: None,
            redirect: None,
            redirect_to: None,
        }
    }

    pub fn success() -> Self {
        Self::bare(StatusCode::Success)
    }

    pub fn reload() -> Self {
        Self::bare(StatusCode::Reload)
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            error: Some(detail.into()),
            ..Self::bare(StatusCode::Failure)
        }
    }

    pub fn errors<I, S>(details: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            errors: Some(details.into_iter().map(Into::into).collect()),
            ..Self::bare(StatusCode::Failure)
        }
    }

    /// Informational text the client shows without treating it as success
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            msg: Some(text.into()),
            ..Self::bare(StatusCode::Failure)
        }
    }

    /// Navigate the client to `target`
    pub fn redirect(target: impl Into<String>) -> Self {
        Self {
            redirect_to: Some(target.into()),
            ..Self::bare(StatusCode::Redirect)
        }
    }

    /// Success that also tells the client where to go next
    pub fn success_redirect(target: impl Into<String>) -> Self {
        Self {
            redirect: Some(target.into()),
            ..Self::bare(StatusCode::Success)
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn error_list(&self) -> Option<&[String]> {
        self.errors.as_deref()
    }

    pub fn msg(&self) -> Option<&str> {
        self.msg.as_deref()
    }

    pub fn redirect_target(&self) -> Option<&str> {
        self.redirect_to.as_deref().or(self.redirect.as_deref())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_exact_payload() {
        let json = ResponseEnvelope::redirect("/dashboard").to_json().unwrap();
        assert_eq!(json, r#"{"statusCode":6,"redirectTo":"/dashboard"}"#);
    }

    #[test]
    fn test_success_and_reload_have_no_payload() {
        assert_eq!(ResponseEnvelope::success().to_json().unwrap(), r#"{"statusCode":1}"#);
        assert_eq!(ResponseEnvelope::reload().to_json().unwrap(), r#"{"statusCode":5}"#);
    }

    #[test]
    fn test_failure_payloads() {
        assert_eq!(
            ResponseEnvelope::error("name is required").to_json().unwrap(),
            r#"{"statusCode":0,"error":"name is required"}"#
        );
        assert_eq!(
            ResponseEnvelope::errors(["a", "b"]).to_json().unwrap(),
            r#"{"statusCode":0,"errors":["a","b"]}"#
        );
        assert_eq!(
            ResponseEnvelope::message("saved as draft").to_json().unwrap(),
            r#"{"statusCode":0,"msg":"saved as draft"}"#
        );
    }

    #[test]
    fn test_success_redirect() {
        let env = ResponseEnvelope::success_redirect("/next");
        assert_eq!(env.to_json().unwrap(), r#"{"statusCode":1,"redirect":"/next"}"#);
        assert_eq!(env.redirect_target(), Some("/next"));
    }

    #[test]
    fn test_unknown_code_decodes_as_failure() {
        let env: ResponseEnvelope = serde_json::from_str(r#"{"statusCode":3,"msg":"?"}"#).unwrap();
        assert_eq!(env.status_code(), StatusCode::Failure);
        let env: ResponseEnvelope = serde_json::from_str(r#"{"statusCode":-1}"#).unwrap();
        assert_eq!(env.status_code(), StatusCode::Failure);
    }
}
