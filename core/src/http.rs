//! HTTP types shared by the pipeline and its transports.
//!
//! # Design
//! A call starts as a `RequestDescriptor` (what the caller asked for), which
//! request interceptors may rewrite. The pipeline then lowers it into an
//! `HttpRequest` (absolute URL, final headers, serialized body) that a
//! `Transport` executes, and the transport hands back an `HttpResponse` as
//! plain data. Bodies are tagged so transports branch exhaustively instead of
//! sniffing payload shapes at runtime.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::form_urlencoded;

use crate::error::ApiError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file to be sent as part of a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read a file from disk, naming the part after the file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self::new(filename, bytes))
    }
}

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File(UploadFile),
}

/// Multipart form payload. Field order is preserved on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    fields: Vec<(String, FormValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), FormValue::Text(value.into())));
        self
    }

    pub fn file(mut self, name: impl Into<String>, file: UploadFile) -> Self {
        self.fields.push((name.into(), FormValue::File(file)));
        self
    }

    pub fn fields(&self) -> &[(String, FormValue)] {
        &self.fields
    }

    /// Total number of file bytes carried by the form.
    pub fn file_bytes(&self) -> u64 {
        self.fields
            .iter()
            .map(|(_, value)| match value {
                FormValue::File(file) => file.bytes.len() as u64,
                FormValue::Text(_) => 0,
            })
            .sum()
    }
}

/// Request body as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Bytes),
    Form(FormData),
}

impl Payload {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ApiError> {
        serde_json::to_value(value)
            .map(Payload::Json)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))
    }
}

/// Describes one call before it reaches the transport.
///
/// Built fresh per call. Request interceptors receive it by value and return
/// the version the next interceptor sees.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub path: String,
    pub params: Vec<(String, Value)>,
    pub body: Option<Payload>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            body: None,
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Append every field of a serializable struct or map as a query param.
    pub fn params<P: Serialize + ?Sized>(mut self, params: &P) -> Result<Self, ApiError> {
        match serde_json::to_value(params) {
            Ok(Value::Object(map)) => {
                self.params.extend(map);
                Ok(self)
            }
            Ok(Value::Null) => Ok(self),
            Ok(other) => Err(ApiError::InvalidRequest(format!(
                "query params must serialize to an object, got {other}"
            ))),
            Err(e) => Err(ApiError::InvalidRequest(e.to_string())),
        }
    }

    pub fn body(mut self, payload: Payload) -> Self {
        self.body = Some(payload);
        self
    }

    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, ApiError> {
        Ok(self.body(Payload::json(body)?))
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        set_header(&mut self.headers, name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Layer per-call overrides on top of this descriptor.
    pub fn with_overrides(mut self, overrides: &RequestOverrides) -> Self {
        for (name, value) in &overrides.headers {
            set_header(&mut self.headers, name.clone(), value.clone());
        }
        if let Some(timeout) = overrides.timeout {
            self.timeout = Some(timeout);
        }
        self
    }
}

/// Per-call headers and timeout for the verb bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOverrides {
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl RequestOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any earlier override with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        set_header(&mut self.headers, name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Body of a lowered request.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    Text(String),
    Binary(Bytes),
    Form(FormData),
}

/// An HTTP request described as plain data, ready for a `Transport`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<HttpBody>,
}

impl HttpRequest {
    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Filename announced by a `Content-Disposition: attachment` header.
    pub fn attachment_filename(&self) -> Option<String> {
        let disposition = self.header_value("content-disposition")?;
        disposition.split(';').map(str::trim).find_map(|part| {
            let value = part.strip_prefix("filename=")?;
            let value = value.trim_matches('"');
            (!value.is_empty()).then(|| value.to_string())
        })
    }
}

/// Build a query string from ordered params.
///
/// `null` and empty-string values are dropped; everything else is
/// percent-encoded in insertion order.
pub fn query_string(params: &[(String, Value)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        let rendered = match value {
            Value::Null => continue,
            Value::String(s) if s.is_empty() => continue,
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            other => other.to_string(),
        };
        serializer.append_pair(key, &rendered);
    }
    serializer.finish()
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

pub(crate) fn set_header(headers: &mut Vec<(String, String)>, name: String, value: String) {
    headers.retain(|(key, _)| !key.eq_ignore_ascii_case(&name));
    headers.push((name, value));
}
