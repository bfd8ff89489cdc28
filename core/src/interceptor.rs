//! Interceptor chains and the stock interceptors every client installs.
//!
//! # Design
//! Request and response interceptors are transformers: each receives the
//! value produced by the previous one and may fail the call. Error
//! interceptors are observers: they see the failure by reference, may cause
//! side effects (redirect, notify), and can never replace or suppress the
//! error being reported.
//!
//! Plain async closures implement the traits, so ad-hoc interceptors need no
//! named type. Closure error observers receive an owned copy of the error.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ApiError, SERVER_ERROR_MESSAGE};
use crate::hooks::{Navigator, Notifier};
use crate::http::{HttpResponse, RequestDescriptor};
use crate::storage::{Storage, StorageExt};

pub const UNAUTHORIZED_NOTICE: &str = "Session expired, please sign in again";
pub const FORBIDDEN_NOTICE: &str = "You do not have permission to perform this action";

#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn on_request(&self, request: RequestDescriptor) -> Result<RequestDescriptor, ApiError>;
}

#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn on_response(&self, response: HttpResponse) -> Result<HttpResponse, ApiError>;
}

#[async_trait]
pub trait ErrorInterceptor: Send + Sync {
    async fn on_error(&self, error: &ApiError) -> Result<(), ApiError>;
}

#[async_trait]
impl<F, Fut> RequestInterceptor for F
where
    F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RequestDescriptor, ApiError>> + Send + 'static,
{
    async fn on_request(&self, request: RequestDescriptor) -> Result<RequestDescriptor, ApiError> {
        self(request).await
    }
}

#[async_trait]
impl<F, Fut> ResponseInterceptor for F
where
    F: Fn(HttpResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, ApiError>> + Send + 'static,
{
    async fn on_response(&self, response: HttpResponse) -> Result<HttpResponse, ApiError> {
        self(response).await
    }
}

#[async_trait]
impl<F, Fut> ErrorInterceptor for F
where
    F: Fn(ApiError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ApiError>> + Send + 'static,
{
    async fn on_error(&self, error: &ApiError) -> Result<(), ApiError> {
        self(error.clone()).await
    }
}

/// `Bearer <token>` for the token stored under `key`, if any.
pub(crate) fn bearer(storage: &dyn Storage, key: &str) -> Option<String> {
    storage
        .get::<String>(key)
        .filter(|token| !token.is_empty())
        .map(|token| format!("Bearer {token}"))
}

/// Turn a non-2xx response into `ApiError::Http`, keeping the server message.
pub fn reject_unsuccessful(response: HttpResponse) -> Result<HttpResponse, ApiError> {
    if response.is_success() {
        return Ok(response);
    }
    let body = serde_json::from_slice::<Value>(&response.body).ok();
    let field = |name: &str| {
        body.as_ref()
            .and_then(|b| b.get(name))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Err(ApiError::Http {
        status: response.status,
        code: field("code"),
        message: field("message").unwrap_or_else(|| SERVER_ERROR_MESSAGE.to_string()),
        body,
    })
}

/// Attaches the persisted bearer token to every request.
pub struct AuthInterceptor {
    storage: Arc<dyn Storage>,
    token_key: String,
}

impl AuthInterceptor {
    pub fn new(storage: Arc<dyn Storage>, token_key: impl Into<String>) -> Self {
        Self {
            storage,
            token_key: token_key.into(),
        }
    }
}

#[async_trait]
impl RequestInterceptor for AuthInterceptor {
    async fn on_request(&self, request: RequestDescriptor) -> Result<RequestDescriptor, ApiError> {
        Ok(match bearer(self.storage.as_ref(), &self.token_key) {
            Some(value) => request.header("Authorization", value),
            None => request,
        })
    }
}

/// Rejects non-2xx responses.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusInterceptor;

#[async_trait]
impl ResponseInterceptor for StatusInterceptor {
    async fn on_response(&self, response: HttpResponse) -> Result<HttpResponse, ApiError> {
        reject_unsuccessful(response)
    }
}

/// Ends the session on 401 and tells the user what went wrong.
pub struct SessionErrorInterceptor {
    storage: Arc<dyn Storage>,
    token_key: String,
    login_path: String,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
}

impl SessionErrorInterceptor {
    pub fn new(
        storage: Arc<dyn Storage>,
        token_key: impl Into<String>,
        login_path: impl Into<String>,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            storage,
            token_key: token_key.into(),
            login_path: login_path.into(),
            navigator,
            notifier,
        }
    }
}

#[async_trait]
impl ErrorInterceptor for SessionErrorInterceptor {
    async fn on_error(&self, error: &ApiError) -> Result<(), ApiError> {
        match error.status() {
            Some(401) => {
                self.storage.remove(&self.token_key);
                if self.navigator.current_path() != self.login_path {
                    tracing::info!(to = %self.login_path, "session ended, redirecting");
                    self.navigator.redirect(&self.login_path);
                }
                self.notifier.notify(UNAUTHORIZED_NOTICE);
            }
            Some(403) => self.notifier.notify(FORBIDDEN_NOTICE),
            _ => self.notifier.notify(&error.message()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{MemoryNavigator, RecordingNotifier};
    use crate::http::HttpMethod;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn auth_interceptor_attaches_token() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("token", "secret");
        let interceptor = AuthInterceptor::new(storage, "token");

        let request = interceptor
            .on_request(RequestDescriptor::new(HttpMethod::Get, "/users"))
            .await
            .unwrap();
        assert_eq!(request.header_value("authorization"), Some("Bearer secret"));
    }

    #[tokio::test]
    async fn auth_interceptor_without_token_is_noop() {
        let interceptor = AuthInterceptor::new(Arc::new(MemoryStorage::new()), "token");
        let request = interceptor
            .on_request(RequestDescriptor::new(HttpMethod::Get, "/users"))
            .await
            .unwrap();
        assert!(request.headers.is_empty());
    }

    #[test]
    fn rejection_carries_server_message() {
        let response = HttpResponse::new(409, r#"{"success":false,"message":"邮箱已存在"}"#);
        let err = reject_unsuccessful(response).unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.message(), "邮箱已存在");
        assert_eq!(err.code(), "HTTP_409");
    }

    #[test]
    fn rejection_without_body_uses_generic_message() {
        let err =
            reject_unsuccessful(HttpResponse::new(502, "<html>bad gateway</html>")).unwrap_err();
        assert_eq!(err.message(), SERVER_ERROR_MESSAGE);
        assert!(err.details().is_none());
    }

    #[test]
    fn success_passes_through() {
        let response = HttpResponse::new(201, "{}");
        assert_eq!(reject_unsuccessful(response.clone()).unwrap(), response);
    }

    fn session(
        path: &str,
    ) -> (
        SessionErrorInterceptor,
        Arc<MemoryStorage>,
        Arc<MemoryNavigator>,
        Arc<RecordingNotifier>,
    ) {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("token", "stale");
        let navigator = Arc::new(MemoryNavigator::new(path));
        let notifier = Arc::new(RecordingNotifier::new());
        let interceptor = SessionErrorInterceptor::new(
            storage.clone(),
            "token",
            "/login",
            navigator.clone(),
            notifier.clone(),
        );
        (interceptor, storage, navigator, notifier)
    }

    fn http_error(status: u16, message: &str) -> ApiError {
        ApiError::Http {
            status,
            code: None,
            message: message.to_string(),
            body: None,
        }
    }

    #[tokio::test]
    async fn unauthorized_clears_token_and_redirects_once() {
        let (interceptor, storage, navigator, notifier) = session("/users");

        interceptor.on_error(&http_error(401, "expired")).await.unwrap();
        interceptor.on_error(&http_error(401, "expired")).await.unwrap();

        assert_eq!(storage.get::<String>("token"), None);
        assert_eq!(navigator.redirects(), vec!["/login".to_string()]);
        assert_eq!(notifier.messages(), vec![UNAUTHORIZED_NOTICE, UNAUTHORIZED_NOTICE]);
    }

    #[tokio::test]
    async fn unauthorized_on_login_page_does_not_redirect() {
        let (interceptor, _, navigator, _) = session("/login");
        interceptor.on_error(&http_error(401, "bad credentials")).await.unwrap();
        assert!(navigator.redirects().is_empty());
    }

    #[tokio::test]
    async fn forbidden_and_other_errors_notify_only() {
        let (interceptor, storage, navigator, notifier) = session("/users");

        interceptor.on_error(&http_error(403, "nope")).await.unwrap();
        interceptor.on_error(&http_error(409, "邮箱已存在")).await.unwrap();
        interceptor.on_error(&ApiError::interceptor("")).await.unwrap();

        assert_eq!(storage.get::<String>("token").as_deref(), Some("stale"));
        assert!(navigator.redirects().is_empty());
        assert_eq!(
            notifier.messages(),
            vec![FORBIDDEN_NOTICE, "邮箱已存在", crate::error::DEFAULT_ERROR_MESSAGE]
        );
    }

    #[tokio::test]
    async fn closures_are_interceptors() {
        let stamp = |request: RequestDescriptor| async move {
            Ok::<_, ApiError>(request.header("X-Trace", "1"))
        };
        let request = stamp
            .on_request(RequestDescriptor::new(HttpMethod::Get, "/"))
            .await
            .unwrap();
        assert_eq!(request.header_value("x-trace"), Some("1"));
    }
}
