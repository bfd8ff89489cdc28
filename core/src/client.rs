//! The request pipeline.
//!
//! # Design
//! `ApiClient` owns its configuration, transport, storage handle and the three
//! interceptor registries. Nothing is process-global, so differently
//! configured clients can live side by side.
//!
//! A call flows through `execute`: request interceptors, lowering into an
//! `HttpRequest`, the transport call under a timeout, response interceptors,
//! envelope decoding. Any failure is shown to every error interceptor and
//! then returned unchanged. Registries are snapshotted per call so no lock is
//! held across an await.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::hooks::{LogNotifier, MemoryNavigator, Navigator, Notifier};
use crate::http::{
    query_string, set_header, FormData, HttpBody, HttpMethod, HttpRequest, HttpResponse, Payload,
    RequestDescriptor, RequestOverrides, UploadFile,
};
use crate::interceptor::{
    bearer, reject_unsuccessful, AuthInterceptor, ErrorInterceptor, RequestInterceptor,
    ResponseInterceptor, SessionErrorInterceptor, StatusInterceptor,
};
use crate::storage::{MemoryStorage, Storage, StorageExt};
use crate::transport::{ProgressSender, ReqwestTransport, Transport};

/// Multipart field name carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "file";

/// Filename used when neither the caller nor the server names a download.
pub const DEFAULT_DOWNLOAD_NAME: &str = "download";

const DEFAULT_CONTENT_TYPE: &str = "application/json";

pub struct ApiClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn Storage>,
    request_interceptors: RwLock<Vec<Arc<dyn RequestInterceptor>>>,
    response_interceptors: RwLock<Vec<Arc<dyn ResponseInterceptor>>>,
    error_interceptors: RwLock<Vec<Arc<dyn ErrorInterceptor>>>,
}

/// Collaborators default to a reqwest transport, in-memory storage, a
/// log-only notifier and an in-memory navigator starting at `/`.
pub struct ApiClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    storage: Option<Arc<dyn Storage>>,
    navigator: Option<Arc<dyn Navigator>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl ApiClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Build the client with the default interceptors installed first.
    pub fn build(self) -> ApiClient {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let navigator = self
            .navigator
            .unwrap_or_else(|| Arc::new(MemoryNavigator::new("/")));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));

        let auth: Arc<dyn RequestInterceptor> =
            Arc::new(AuthInterceptor::new(storage.clone(), &self.config.token_key));
        let status: Arc<dyn ResponseInterceptor> = Arc::new(StatusInterceptor);
        let session: Arc<dyn ErrorInterceptor> = Arc::new(SessionErrorInterceptor::new(
            storage.clone(),
            &self.config.token_key,
            &self.config.login_path,
            navigator,
            notifier,
        ));

        ApiClient {
            config: self.config,
            transport,
            storage,
            request_interceptors: RwLock::new(vec![auth]),
            response_interceptors: RwLock::new(vec![status]),
            error_interceptors: RwLock::new(vec![session]),
        }
    }
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            transport: None,
            storage: None,
            navigator: None,
            notifier: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn token(&self) -> Option<String> {
        self.storage.get::<String>(&self.config.token_key)
    }

    pub fn set_token(&self, token: &str) {
        self.storage.set(&self.config.token_key, token);
    }

    pub fn clear_token(&self) {
        self.storage.remove(&self.config.token_key);
    }

    pub fn add_request_interceptor(&self, interceptor: impl RequestInterceptor + 'static) {
        self.request_interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(interceptor));
    }

    pub fn add_response_interceptor(&self, interceptor: impl ResponseInterceptor + 'static) {
        self.response_interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(interceptor));
    }

    pub fn add_error_interceptor(&self, interceptor: impl ErrorInterceptor + 'static) {
        self.error_interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(interceptor));
    }

    /// Absolute URL for `path` under the base URL, with the query string.
    pub fn url(&self, path: &str, params: &[(String, Value)]) -> String {
        let mut url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.config.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };
        let query = query_string(params);
        if !query.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&query);
        }
        url
    }

    /// Lower a descriptor into the request the transport executes.
    pub fn build_request(&self, descriptor: RequestDescriptor) -> Result<HttpRequest, ApiError> {
        let RequestDescriptor {
            method,
            path,
            params,
            body,
            headers: overrides,
            ..
        } = descriptor;

        let is_form = matches!(body, Some(Payload::Form(_)));
        let mut headers = vec![("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string())];
        for (name, value) in overrides {
            set_header(&mut headers, name, value);
        }
        if is_form {
            // The transport writes the multipart boundary itself.
            headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
        }

        let body = match body {
            None => None,
            Some(Payload::Json(value)) => Some(HttpBody::Text(
                serde_json::to_string(&value)
                    .map_err(|e| ApiError::InvalidRequest(e.to_string()))?,
            )),
            Some(Payload::Binary(bytes)) => Some(HttpBody::Binary(bytes)),
            Some(Payload::Form(form)) => Some(HttpBody::Form(form)),
        };

        Ok(HttpRequest {
            method,
            url: self.url(&path, &params),
            headers,
            body,
        })
    }

    /// Run one call through the full pipeline.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<Envelope<T>, ApiError> {
        let result = self.run(descriptor).await;
        self.settle(result).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Envelope<T>, ApiError> {
        self.get_with(path, &RequestOverrides::default()).await
    }

    pub async fn get_with<T: DeserializeOwned>(
        &self,
        path: &str,
        overrides: &RequestOverrides,
    ) -> Result<Envelope<T>, ApiError> {
        let descriptor = RequestDescriptor::new(HttpMethod::Get, path).with_overrides(overrides);
        self.execute(descriptor).await
    }

    pub async fn get_with_params<T, P>(
        &self,
        path: &str,
        params: &P,
    ) -> Result<Envelope<T>, ApiError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let descriptor = RequestDescriptor::new(HttpMethod::Get, path).params(params);
        self.execute_built(descriptor).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<Envelope<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.post_with(path, body, &RequestOverrides::default()).await
    }

    pub async fn post_with<T, B>(
        &self,
        path: &str,
        body: &B,
        overrides: &RequestOverrides,
    ) -> Result<Envelope<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(HttpMethod::Post, path, body, overrides).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<Envelope<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.put_with(path, body, &RequestOverrides::default()).await
    }

    pub async fn put_with<T, B>(
        &self,
        path: &str,
        body: &B,
        overrides: &RequestOverrides,
    ) -> Result<Envelope<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(HttpMethod::Put, path, body, overrides).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<Envelope<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.patch_with(path, body, &RequestOverrides::default()).await
    }

    pub async fn patch_with<T, B>(
        &self,
        path: &str,
        body: &B,
        overrides: &RequestOverrides,
    ) -> Result<Envelope<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(HttpMethod::Patch, path, body, overrides).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<Envelope<T>, ApiError> {
        self.delete_with(path, &RequestOverrides::default()).await
    }

    pub async fn delete_with<T: DeserializeOwned>(
        &self,
        path: &str,
        overrides: &RequestOverrides,
    ) -> Result<Envelope<T>, ApiError> {
        let descriptor = RequestDescriptor::new(HttpMethod::Delete, path).with_overrides(overrides);
        self.execute(descriptor).await
    }

    /// Upload one file as multipart field `file`.
    ///
    /// Bypasses the request and response interceptors; the bearer token is
    /// attached directly. Failures still reach the error interceptors.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        file: UploadFile,
        progress: Option<ProgressSender>,
    ) -> Result<Envelope<T>, ApiError> {
        let result = self.run_upload(path, file, progress).await;
        self.settle(result).await
    }

    /// Fetch a binary payload and save it into the download directory.
    ///
    /// The body is staged in a temporary file next to the target, which is
    /// removed on failure and renamed into place on success.
    pub async fn download(&self, path: &str, filename: Option<&str>) -> Result<PathBuf, ApiError> {
        let result = self.run_download(path, filename).await;
        self.settle(result).await
    }

    async fn run<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<Envelope<T>, ApiError> {
        let mut descriptor = descriptor;
        for interceptor in self.request_chain() {
            descriptor = interceptor.on_request(descriptor).await?;
        }

        let timeout = descriptor.timeout.unwrap_or_else(|| self.config.timeout());
        let request = self.build_request(descriptor)?;
        let mut response = self.send(request, timeout).await?;

        for interceptor in self.response_chain() {
            response = interceptor.on_response(response).await?;
        }
        response.json()
    }

    async fn run_upload<T: DeserializeOwned>(
        &self,
        path: &str,
        file: UploadFile,
        progress: Option<ProgressSender>,
    ) -> Result<Envelope<T>, ApiError> {
        let form = FormData::new().file(UPLOAD_FIELD, file);
        let descriptor = self
            .authorized(HttpMethod::Post, path)
            .body(Payload::Form(form));
        let request = self.build_request(descriptor)?;

        tracing::debug!(url = %request.url, "uploading");
        let response = self.transport.upload(request, progress).await?;
        reject_unsuccessful(response)?.json()
    }

    async fn run_download(&self, path: &str, filename: Option<&str>) -> Result<PathBuf, ApiError> {
        let request = self.build_request(self.authorized(HttpMethod::Get, path))?;
        let response = reject_unsuccessful(self.send(request, self.config.timeout()).await?)?;

        let name = filename
            .map(str::to_string)
            .or_else(|| response.attachment_filename())
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_NAME.to_string());
        let name = safe_file_name(&name);
        let dir = self.config.download_dir.clone();
        let body = response.body;

        let saved = tokio::task::spawn_blocking(move || save(&dir, &name, &body))
            .await
            .map_err(|e| ApiError::Io(e.to_string()))??;
        tracing::debug!(path = %saved.display(), "download saved");
        Ok(saved)
    }

    async fn send(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, ApiError> {
        let method = request.method;
        let url = request.url.clone();
        tracing::debug!(%method, %url, "sending request");

        // Dropping the transport future on expiry aborts the call.
        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(result) => {
                let response = result?;
                tracing::debug!(%method, %url, status = response.status, "received response");
                Ok(response)
            }
            Err(_) => {
                tracing::warn!(
                    %method,
                    %url,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(ApiError::Timeout(timeout))
            }
        }
    }

    async fn send_json<T, B>(
        &self,
        method: HttpMethod,
        path: &str,
        body: &B,
        overrides: &RequestOverrides,
    ) -> Result<Envelope<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let descriptor = RequestDescriptor::new(method, path)
            .json(body)
            .map(|descriptor| descriptor.with_overrides(overrides));
        self.execute_built(descriptor).await
    }

    async fn execute_built<T: DeserializeOwned>(
        &self,
        descriptor: Result<RequestDescriptor, ApiError>,
    ) -> Result<Envelope<T>, ApiError> {
        match descriptor {
            Ok(descriptor) => self.execute(descriptor).await,
            Err(err) => self.settle(Err(err)).await,
        }
    }

    /// Show a failure to every error interceptor, then hand the result back.
    async fn settle<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(error) = &result {
            for interceptor in self.error_chain() {
                if let Err(secondary) = interceptor.on_error(error).await {
                    tracing::warn!(
                        error = %error,
                        secondary = %secondary,
                        "error interceptor failed"
                    );
                }
            }
        }
        result
    }

    fn authorized(&self, method: HttpMethod, path: &str) -> RequestDescriptor {
        let descriptor = RequestDescriptor::new(method, path);
        match bearer(self.storage.as_ref(), &self.config.token_key) {
            Some(value) => descriptor.header("Authorization", value),
            None => descriptor,
        }
    }

    fn request_chain(&self) -> Vec<Arc<dyn RequestInterceptor>> {
        self.request_interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn response_chain(&self) -> Vec<Arc<dyn ResponseInterceptor>> {
        self.response_interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn error_chain(&self) -> Vec<Arc<dyn ErrorInterceptor>> {
        self.error_interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Last path component of `name`, so a server-supplied name cannot escape
/// the download directory.
fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_DOWNLOAD_NAME)
        .to_string()
}

fn save(dir: &Path, name: &str, body: &[u8]) -> Result<PathBuf, ApiError> {
    std::fs::create_dir_all(dir)?;
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(body)?;
    staged.flush()?;
    let target = dir.join(name);
    staged
        .persist(&target)
        .map_err(|e| ApiError::Io(e.error.to_string()))?;
    Ok(target)
}
