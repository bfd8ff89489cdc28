//! Pipeline behavior against an in-memory transport.
//!
//! # Design
//! `FakeTransport` records every lowered request and replays canned
//! responses, so interceptor ordering, error reporting and timeouts can be
//! asserted without a server. Timeout tests run on a paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use admin_client::interceptor::{FORBIDDEN_NOTICE, UNAUTHORIZED_NOTICE};
use admin_client::{
    progress_channel, ApiClient, ApiError, ClientConfig, Envelope, HttpBody, HttpMethod,
    HttpRequest, HttpResponse, MemoryNavigator, Progress, RecordingNotifier, RequestDescriptor,
    RequestOverrides, Transport, UploadFile, UploadedFile,
};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Default)]
struct FakeTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
    completed: AtomicUsize,
}

impl FakeTransport {
    fn replying(responses: Vec<HttpResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    fn delayed(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| ok(Value::Null)))
    }
}

fn ok(data: Value) -> HttpResponse {
    HttpResponse::new(200, json!({ "data": data, "success": true }).to_string())
}

fn failure(status: u16, message: &str) -> HttpResponse {
    HttpResponse::new(
        status,
        json!({ "success": false, "message": message }).to_string(),
    )
}

struct Harness {
    client: ApiClient,
    transport: Arc<FakeTransport>,
    navigator: Arc<MemoryNavigator>,
    notifier: Arc<RecordingNotifier>,
}

fn harness(transport: Arc<FakeTransport>) -> Harness {
    let navigator = Arc::new(MemoryNavigator::new("/users"));
    let notifier = Arc::new(RecordingNotifier::new());
    let client = ApiClient::builder(ClientConfig::new("http://admin.test/api"))
        .transport(transport.clone())
        .navigator(navigator.clone())
        .notifier(notifier.clone())
        .build();
    Harness {
        client,
        transport,
        navigator,
        notifier,
    }
}

// ---------------------------------------------------------------------------
// Verbs and success path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn each_verb_sends_its_method() {
    let h = harness(FakeTransport::replying(Vec::new()));
    let body = json!({"name": "Ann"});

    h.client.get::<Value>("/users").await.unwrap();
    h.client.post::<Value, _>("/users", &body).await.unwrap();
    h.client.put::<Value, _>("/users/1", &body).await.unwrap();
    h.client.patch::<Value, _>("/users/1", &body).await.unwrap();
    h.client.delete::<Value>("/users/1").await.unwrap();

    let methods: Vec<HttpMethod> = h.transport.requests().iter().map(|r| r.method).collect();
    assert_eq!(
        methods,
        vec![
            HttpMethod::Get,
            HttpMethod::Post,
            HttpMethod::Put,
            HttpMethod::Patch,
            HttpMethod::Delete,
        ]
    );
}

#[tokio::test]
async fn success_returns_server_data_unchanged() {
    let data = json!({"items": [{"id": 1, "tags": ["a", "b"]}], "ratio": 0.25, "note": null});
    let h = harness(FakeTransport::replying(vec![ok(data.clone())]));

    let envelope: Envelope<Value> = h.client.get("/report").await.unwrap();
    assert!(envelope.success);
    assert_eq!(envelope.data, data);
    assert!(h.notifier.messages().is_empty());
}

#[tokio::test]
async fn query_params_skip_empty_values() {
    let h = harness(FakeTransport::replying(Vec::new()));
    h.client
        .get_with_params::<Value, _>(
            "/users",
            &json!({"current": 2, "pageSize": 20, "search": "", "role": null}),
        )
        .await
        .unwrap();

    assert_eq!(
        h.transport.requests()[0].url,
        "http://admin.test/api/users?current=2&pageSize=20"
    );
}

// ---------------------------------------------------------------------------
// Interceptors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_interceptors_run_in_registration_order() {
    let h = harness(FakeTransport::replying(Vec::new()));
    h.client.set_token("t-1");
    let seen: Arc<Mutex<Vec<(usize, Option<String>, Option<String>)>>> = Arc::default();

    for step in 1..=3usize {
        let seen = seen.clone();
        h.client.add_request_interceptor(move |request: RequestDescriptor| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push((
                    step,
                    request.header_value("Authorization").map(str::to_string),
                    request.header_value("X-Step").map(str::to_string),
                ));
                Ok::<_, ApiError>(request.header("X-Step", step.to_string()))
            }
        });
    }

    h.client.get::<Value>("/users").await.unwrap();

    let seen = seen.lock().unwrap().clone();
    let bearer = Some("Bearer t-1".to_string());
    assert_eq!(
        seen,
        vec![
            (1, bearer.clone(), None),
            (2, bearer.clone(), Some("1".to_string())),
            (3, bearer, Some("2".to_string())),
        ]
    );
    assert_eq!(h.transport.requests()[0].header_value("x-step"), Some("3"));
}

#[tokio::test]
async fn response_interceptors_see_status_checked_response() {
    let h = harness(FakeTransport::replying(vec![ok(json!(1))]));
    let statuses: Arc<Mutex<Vec<u16>>> = Arc::default();
    let recorded = statuses.clone();
    h.client.add_response_interceptor(move |response: HttpResponse| {
        let recorded = recorded.clone();
        async move {
            recorded.lock().unwrap().push(response.status);
            Ok::<_, ApiError>(HttpResponse::new(response.status, ok(json!(2)).body))
        }
    });

    let envelope: Envelope<i64> = h.client.get("/n").await.unwrap();
    assert_eq!(envelope.data, 2);
    assert_eq!(*statuses.lock().unwrap(), vec![200]);
}

#[tokio::test]
async fn request_interceptor_failure_is_reported_and_skips_transport() {
    let h = harness(FakeTransport::replying(Vec::new()));
    h.client.add_request_interceptor(|_request: RequestDescriptor| async {
        Err::<RequestDescriptor, _>(ApiError::interceptor_with_code("BLOCKED", "maintenance"))
    });

    let err = h.client.get::<Value>("/users").await.unwrap_err();
    assert_eq!(err.code(), "BLOCKED");
    assert!(h.transport.requests().is_empty());
    assert_eq!(h.notifier.messages(), vec!["maintenance"]);
}

#[tokio::test]
async fn failing_error_interceptor_does_not_replace_error() {
    let h = harness(FakeTransport::replying(vec![failure(409, "邮箱已存在")]));
    let later_calls = Arc::new(AtomicUsize::new(0));

    h.client.add_error_interceptor(|_error: ApiError| async {
        Err::<(), _>(ApiError::interceptor("observer broke"))
    });
    let counter = later_calls.clone();
    h.client.add_error_interceptor(move |error: ApiError| {
        let counter = counter.clone();
        async move {
            assert_eq!(error.status(), Some(409));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ApiError>(())
        }
    });

    let err = h
        .client
        .post::<Value, _>("/users", &json!({"email": "admin@example.com"}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(409));
    assert_eq!(err.message(), "邮箱已存在");
    assert_eq!(later_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.notifier.messages(), vec!["邮箱已存在"]);
}

#[tokio::test]
async fn malformed_body_is_an_invalid_response() {
    let h = harness(FakeTransport::replying(vec![HttpResponse::new(200, "<html>")]));
    let err = h.client.get::<Value>("/users").await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidResponse(_)));
    assert_eq!(err.code(), "INVALID_RESPONSE");
    assert_eq!(h.notifier.messages().len(), 1);
}

// ---------------------------------------------------------------------------
// Session handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unauthorized_clears_token_and_redirects_once() {
    let h = harness(FakeTransport::replying(vec![
        failure(401, "未授权"),
        failure(401, "未授权"),
    ]));
    h.client.set_token("stale");

    let err = h.client.get::<Value>("/users").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(h.client.token(), None);
    assert_eq!(h.navigator.redirects(), vec!["/login".to_string()]);

    h.client.get::<Value>("/users").await.unwrap_err();
    let requests = h.transport.requests();
    assert_eq!(requests[0].header_value("authorization"), Some("Bearer stale"));
    assert_eq!(requests[1].header_value("authorization"), None);
    assert_eq!(h.navigator.redirects().len(), 1);
    assert_eq!(
        h.notifier.messages(),
        vec![UNAUTHORIZED_NOTICE, UNAUTHORIZED_NOTICE]
    );
}

#[tokio::test]
async fn forbidden_keeps_session() {
    let h = harness(FakeTransport::replying(vec![failure(403, "没有权限")]));
    h.client.set_token("valid");

    let err = h.client.delete::<Value>("/users/1").await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert_eq!(h.client.token().as_deref(), Some("valid"));
    assert!(h.navigator.redirects().is_empty());
    assert_eq!(h.notifier.messages(), vec![FORBIDDEN_NOTICE]);
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn timeout_aborts_transport_call() {
    let transport = FakeTransport::delayed(Duration::from_secs(60));
    let navigator = Arc::new(MemoryNavigator::new("/"));
    let client = ApiClient::builder(
        ClientConfig::new("http://admin.test").with_timeout(Duration::from_millis(100)),
    )
    .transport(transport.clone())
    .navigator(navigator)
    .build();

    let err = client.get::<Value>("/slow").await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.code(), "TIMEOUT");

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(transport.completed.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn descriptor_timeout_overrides_default() {
    let h = harness(FakeTransport::delayed(Duration::from_secs(5)));

    let envelope: Envelope<Value> = h
        .client
        .execute(RequestDescriptor::new(HttpMethod::Get, "/slow").timeout(Duration::from_secs(30)))
        .await
        .unwrap();
    assert!(envelope.success);

    let err = h
        .client
        .execute::<Value>(
            RequestDescriptor::new(HttpMethod::Get, "/slow").timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Timeout(d) if d == Duration::from_secs(1)));
}

#[tokio::test(start_paused = true)]
async fn verb_overrides_set_headers_and_timeout() {
    let h = harness(FakeTransport::delayed(Duration::from_secs(5)));

    let err = h
        .client
        .post_with::<Value, _>(
            "/users",
            &json!({"name": "Ann"}),
            &RequestOverrides::new()
                .header("X-Request-Id", "req-1")
                .timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Timeout(d) if d == Duration::from_secs(1)));

    let envelope: Envelope<Value> = h
        .client
        .patch_with(
            "/users/1",
            &json!({"status": "inactive"}),
            &RequestOverrides::new()
                .header("content-type", "application/merge-patch+json")
                .timeout(Duration::from_secs(30)),
        )
        .await
        .unwrap();
    assert!(envelope.success);

    let requests = h.transport.requests();
    assert_eq!(requests[0].method, HttpMethod::Post);
    assert_eq!(requests[0].header_value("x-request-id"), Some("req-1"));
    assert_eq!(requests[1].method, HttpMethod::Patch);
    assert_eq!(
        requests[1].header_value("Content-Type"),
        Some("application/merge-patch+json")
    );
    assert_eq!(requests[1].headers.len(), 1);
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_without_streaming_reports_one_completion_event() {
    let h = harness(FakeTransport::replying(vec![ok(
        json!({"filename": "report.csv", "size": 3}),
    )]));
    h.client.set_token("valid");

    let (tx, mut rx) = progress_channel();
    let uploaded: Envelope<UploadedFile> = h
        .client
        .upload("/upload", UploadFile::new("report.csv", "a,b"), Some(tx))
        .await
        .unwrap();
    assert_eq!(uploaded.data.size, 3);

    assert_eq!(rx.recv().await, Some(Progress { loaded: 3, total: 3 }));
    assert_eq!(rx.recv().await, None);

    let request = &h.transport.requests()[0];
    assert_eq!(request.method, HttpMethod::Post);
    assert_eq!(request.header_value("authorization"), Some("Bearer valid"));
    assert_eq!(request.header_value("content-type"), None);
    match &request.body {
        Some(HttpBody::Form(form)) => assert_eq!(form.fields()[0].0, "file"),
        other => panic!("expected a form body, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_upload_ends_session() {
    let h = harness(FakeTransport::replying(vec![failure(401, "未授权")]));
    h.client.set_token("stale");

    let (tx, mut rx) = progress_channel();
    let err = h
        .client
        .upload::<UploadedFile>("/upload", UploadFile::new("a.txt", "hi"), Some(tx))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert_eq!(h.client.token(), None);
    assert_eq!(h.navigator.redirects(), vec!["/login".to_string()]);
    assert_eq!(h.notifier.messages(), vec![UNAUTHORIZED_NOTICE]);
    // The transport call itself succeeded, so its completion event was sent.
    assert_eq!(rx.recv().await.map(|p| p.percent()), Some(100));
}

// ---------------------------------------------------------------------------
// Isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clients_do_not_share_configuration() {
    let first = harness(FakeTransport::replying(Vec::new()));
    let second = harness(FakeTransport::replying(Vec::new()));

    first
        .client
        .add_request_interceptor(|request: RequestDescriptor| async move {
            Ok::<_, ApiError>(request.header("X-Tenant", "first"))
        });
    first.client.set_token("first-token");

    second.client.get::<Value>("/users").await.unwrap();
    let request = &second.transport.requests()[0];
    assert_eq!(request.header_value("x-tenant"), None);
    assert_eq!(request.header_value("authorization"), None);
}
