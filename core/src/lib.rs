//! Async API client for the admin dashboard backend.
//!
//! # Overview
//! `ApiClient` is a request pipeline: it resolves paths against a base URL,
//! runs request, response and error interceptor chains, enforces per-call
//! timeouts and decodes every successful call into an [`Envelope`]. Every
//! failure comes back as a single [`ApiError`] after the error interceptors
//! have seen it.
//!
//! # Design
//! - Transport is a trait. The pipeline builds `HttpRequest` values and
//!   interprets `HttpResponse` values; `ReqwestTransport` does the I/O.
//! - Session state (the bearer token) lives behind the `Storage` trait.
//!   User-facing side effects go through `Notifier` and `Navigator`.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod hooks;
pub mod http;
pub mod interceptor;
pub mod storage;
pub mod transport;
pub mod types;
pub mod users;

pub use client::{ApiClient, ApiClientBuilder};
pub use config::ClientConfig;
pub use envelope::{Envelope, Pagination};
pub use error::{ApiError, ErrorObject};
pub use hooks::{LogNotifier, MemoryNavigator, Navigator, Notifier, RecordingNotifier};
pub use http::{
    FormData, FormValue, HttpBody, HttpMethod, HttpRequest, HttpResponse, Payload,
    RequestDescriptor, RequestOverrides, UploadFile,
};
pub use interceptor::{ErrorInterceptor, RequestInterceptor, ResponseInterceptor};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageExt};
pub use transport::{
    progress_channel, Progress, ProgressReceiver, ProgressSender, ReqwestTransport, Transport,
};
pub use types::{
    CreateUser, LoginRequest, LoginResponse, Role, UpdateUser, UploadedFile, User, UserQuery,
    UserStatus,
};
pub use users::UserService;
