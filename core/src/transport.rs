//! Network transports.
//!
//! # Design
//! The pipeline never talks to the network itself. It lowers every call into
//! an `HttpRequest` and hands it to a `Transport`, which returns the
//! `HttpResponse` as plain data (non-2xx included). Status interpretation stays
//! in the pipeline, so tests can swap in an in-memory transport.
//!
//! Uploads use a separate primitive because progress observation needs the
//! transport to meter the body as it is sent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use reqwest::multipart::{Form, Part};
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::http::{FormData, FormValue, HttpBody, HttpMethod, HttpRequest, HttpResponse};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Upload progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub loaded: u64,
    pub total: u64,
}

impl Progress {
    /// Integer percentage in `0..=100`. An empty body counts as complete.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.loaded.min(self.total) * 100 / self.total) as u8
    }
}

pub type ProgressSender = mpsc::UnboundedSender<Progress>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<Progress>;

/// Channel for observing an upload. Dropping the receiver stops delivery
/// without affecting the upload itself.
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError>;

    /// Send a request whose body is a form, reporting file bytes as they go
    /// out. The default implementation reports a single completion event.
    async fn upload(
        &self,
        request: HttpRequest,
        progress: Option<ProgressSender>,
    ) -> Result<HttpResponse, ApiError> {
        let total = match &request.body {
            Some(HttpBody::Form(form)) => form.file_bytes(),
            _ => 0,
        };
        let response = self.send(request).await?;
        if let Some(progress) = progress {
            let _ = progress.send(Progress {
                loaded: total,
                total,
            });
        }
        Ok(response)
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// `Transport` over a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn builder(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(request.method.into(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    async fn dispatch(&self, builder: reqwest::RequestBuilder) -> Result<HttpResponse, ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let builder = self.builder(&request);
        let builder = match request.body {
            None => builder,
            Some(HttpBody::Text(text)) => builder.body(text),
            Some(HttpBody::Binary(bytes)) => builder.body(bytes),
            Some(HttpBody::Form(form)) => builder.multipart(multipart(form, None)?),
        };
        self.dispatch(builder).await
    }

    async fn upload(
        &self,
        request: HttpRequest,
        progress: Option<ProgressSender>,
    ) -> Result<HttpResponse, ApiError> {
        let builder = self.builder(&request);
        let (builder, total) = match request.body {
            Some(HttpBody::Form(form)) => {
                let total = form.file_bytes();
                let meter = Meter {
                    loaded: Arc::new(AtomicU64::new(0)),
                    total,
                    progress: progress.clone(),
                };
                (builder.multipart(multipart(form, Some(meter))?), total)
            }
            _ => return Err(ApiError::InvalidRequest("upload requires a form body".to_string())),
        };
        let response = self.dispatch(builder).await?;
        if let Some(progress) = progress {
            let _ = progress.send(Progress {
                loaded: total,
                total,
            });
        }
        Ok(response)
    }
}

#[derive(Clone)]
struct Meter {
    loaded: Arc<AtomicU64>,
    total: u64,
    progress: Option<ProgressSender>,
}

impl Meter {
    fn advance(&self, bytes: u64) {
        let loaded = self.loaded.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if let Some(progress) = &self.progress {
            // Receiver may be gone; the upload carries on regardless.
            let _ = progress.send(Progress {
                loaded,
                total: self.total,
            });
        }
    }
}

fn multipart(form: FormData, meter: Option<Meter>) -> Result<Form, ApiError> {
    let mut multipart = Form::new();
    for (name, value) in form.fields() {
        match value {
            FormValue::Text(text) => multipart = multipart.text(name.clone(), text.clone()),
            FormValue::File(file) => {
                let length = file.bytes.len() as u64;
                let part = match &meter {
                    Some(meter) => Part::stream_with_length(
                        metered_body(file.bytes.clone(), meter.clone()),
                        length,
                    ),
                    None => Part::bytes(file.bytes.to_vec()),
                };
                let mut part = part.file_name(file.filename.clone());
                if let Some(content_type) = &file.content_type {
                    part = part
                        .mime_str(content_type)
                        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
                }
                multipart = multipart.part(name.clone(), part);
            }
        }
    }
    Ok(multipart)
}

fn metered_body(bytes: Bytes, meter: Meter) -> reqwest::Body {
    let chunks: Vec<Bytes> = (0..bytes.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK_SIZE).min(bytes.len())))
        .collect();
    let stream = stream::iter(chunks.into_iter().map(move |chunk| {
        meter.advance(chunk.len() as u64);
        Ok::<Bytes, std::io::Error>(chunk)
    }));
    reqwest::Body::wrap_stream(stream)
}
