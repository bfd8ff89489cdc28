use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Multipart, Path, Query, Request, State,
    },
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "admin123";
pub const DEFAULT_PASSWORD: &str = "123456";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    #[default]
    Viewer,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl<T> Envelope<T> {
    fn ok(data: T) -> Self {
        Self {
            data,
            message: None,
            success: true,
            total: None,
            page: None,
            limit: None,
        }
    }

    fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }
}

#[derive(Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
}

#[derive(Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: User,
}

#[derive(Deserialize)]
pub struct ListUsers {
    pub current: Option<usize>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<usize>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredFile {
    pub filename: String,
    pub size: u64,
}

#[derive(Deserialize)]
pub struct SlowQuery {
    pub ms: Option<u64>,
}

struct Account {
    user: User,
    password: String,
}

#[derive(Default)]
pub struct Db {
    accounts: Vec<Account>,
    tokens: HashSet<String>,
    files: HashMap<String, Bytes>,
}

impl Db {
    /// Three accounts, one per role. All but the admin use `DEFAULT_PASSWORD`.
    pub fn seeded() -> Self {
        let mut db = Db::default();
        for (name, email, role) in [
            ("Admin", ADMIN_EMAIL, Role::Admin),
            ("Editor", "editor@example.com", Role::Editor),
            ("Viewer", "viewer@example.com", Role::Viewer),
        ] {
            let password = if role == Role::Admin {
                ADMIN_PASSWORD
            } else {
                DEFAULT_PASSWORD
            };
            db.accounts.push(Account {
                user: User {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    email: email.to_string(),
                    role,
                    status: UserStatus::Active,
                },
                password: password.to_string(),
            });
        }
        db
    }

    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        self.accounts
            .iter()
            .any(|a| a.user.email.eq_ignore_ascii_case(email) && Some(a.user.id) != except)
    }

    fn user_mut(&mut self, id: Uuid) -> Result<&mut User, AppError> {
        self.accounts
            .iter_mut()
            .map(|a| &mut a.user)
            .find(|u| u.id == id)
            .ok_or(AppError::NotFound("用户不存在"))
    }
}

pub type SharedDb = Arc<RwLock<Db>>;

/// Failure responses, rendered as `{ success: false, code, message }`.
///
/// Handlers and the `App*` extractors fail through this type.
#[derive(Debug)]
pub enum AppError {
    Unauthorized,
    InvalidCredentials,
    Forbidden,
    NotFound(&'static str),
    Conflict(&'static str),
    BadRequest(String),
    /// An extractor could not read the request; keeps the rejection's status.
    Rejected(StatusCode, String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "未授权".to_string())
            }
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "邮箱或密码错误".to_string(),
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", "没有权限".to_string()),
            AppError::NotFound(message) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", message.to_string())
            }
            AppError::Conflict(message) => (StatusCode::CONFLICT, "CONFLICT", message.to_string()),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", message),
            AppError::Rejected(status, message) => (status, "INVALID_REQUEST", message),
        };
        let body = serde_json::json!({ "success": false, "code": code, "message": message });
        (status, Json(body)).into_response()
    }
}

/// `Json` whose rejections render as `AppError`.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(AppJson(value))
    }
}

pub struct AppPath<T>(pub T);

impl<S, T> FromRequestParts<S> for AppPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(AppPath(value))
    }
}

pub struct AppQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(AppQuery(value))
    }
}

pub fn app() -> Router {
    app_with(Db::seeded())
}

pub fn app_with(db: Db) -> Router {
    let db: SharedDb = Arc::new(RwLock::new(db));
    let protected = Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/{id}",
            get(get_user)
                .put(update_user)
                .patch(update_user)
                .delete(delete_user),
        )
        .route("/auth/logout", post(logout))
        .route("/upload", post(upload))
        .route("/files/{name}", get(download))
        .route_layer(middleware::from_fn_with_state(db.clone(), require_token));

    Router::new()
        .route("/auth/login", post(login))
        .route("/slow", get(slow))
        .route("/forbidden", get(forbidden))
        .merge(protected)
        .with_state(db)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn require_token(
    State(db): State<SharedDb>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers()).map(str::to_string);
    let authorized = match token {
        Some(token) => db.read().await.tokens.contains(&token),
        None => false,
    };
    if !authorized {
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(request).await)
}

async fn login(
    State(db): State<SharedDb>,
    AppJson(input): AppJson<Credentials>,
) -> Result<Json<Envelope<Session>>, AppError> {
    let mut db = db.write().await;
    let user = db
        .accounts
        .iter()
        .find(|a| {
            a.user.email.eq_ignore_ascii_case(input.email.trim()) && a.password == input.password
        })
        .map(|a| a.user.clone())
        .ok_or(AppError::InvalidCredentials)?;
    if user.status == UserStatus::Inactive {
        return Err(AppError::Forbidden);
    }
    let token = format!("mock-{}", Uuid::new_v4());
    db.tokens.insert(token.clone());
    tracing::info!(email = %user.email, "user signed in");
    Ok(Json(Envelope::ok(Session { token, user }).with_message("登录成功")))
}

async fn logout(State(db): State<SharedDb>, headers: HeaderMap) -> Json<Envelope<()>> {
    if let Some(token) = bearer_token(&headers) {
        db.write().await.tokens.remove(token);
    }
    Json(Envelope::ok(()).with_message("已退出登录"))
}

async fn list_users(
    State(db): State<SharedDb>,
    AppQuery(query): AppQuery<ListUsers>,
) -> Result<Json<Envelope<Vec<User>>>, AppError> {
    let page = query.current.unwrap_or(1).max(1);
    let limit = query.page_size.unwrap_or(10).clamp(1, 100);
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let db = db.read().await;
    let matches: Vec<User> = db
        .accounts
        .iter()
        .map(|a| &a.user)
        .filter(|u| match &search {
            Some(s) => u.name.to_lowercase().contains(s) || u.email.to_lowercase().contains(s),
            None => true,
        })
        .cloned()
        .collect();
    let total = matches.len() as u64;
    let data = matches
        .into_iter()
        .skip(page.saturating_sub(1).saturating_mul(limit))
        .take(limit)
        .collect();

    Ok(Json(Envelope {
        data,
        message: None,
        success: true,
        total: Some(total),
        page: Some(page as u64),
        limit: Some(limit as u64),
    }))
}

async fn create_user(
    State(db): State<SharedDb>,
    AppJson(input): AppJson<CreateUser>,
) -> Result<(StatusCode, Json<Envelope<User>>), AppError> {
    let name = validate_name(&input.name)?;
    let email = validate_email(&input.email)?;

    let mut db = db.write().await;
    if db.email_taken(&email, None) {
        return Err(AppError::Conflict("邮箱已存在"));
    }
    let user = User {
        id: Uuid::new_v4(),
        name,
        email,
        role: input.role,
        status: UserStatus::Active,
    };
    db.accounts.push(Account {
        user: user.clone(),
        password: input.password.unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
    });
    Ok((StatusCode::CREATED, Json(Envelope::ok(user).with_message("创建成功"))))
}

async fn get_user(
    State(db): State<SharedDb>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Envelope<User>>, AppError> {
    let db = db.read().await;
    db.accounts
        .iter()
        .find(|a| a.user.id == id)
        .map(|a| Json(Envelope::ok(a.user.clone())))
        .ok_or(AppError::NotFound("用户不存在"))
}

async fn update_user(
    State(db): State<SharedDb>,
    AppPath(id): AppPath<Uuid>,
    AppJson(input): AppJson<UpdateUser>,
) -> Result<Json<Envelope<User>>, AppError> {
    let name = input.name.as_deref().map(validate_name).transpose()?;
    let email = input.email.as_deref().map(validate_email).transpose()?;

    let mut db = db.write().await;
    if let Some(email) = &email {
        if db.email_taken(email, Some(id)) {
            return Err(AppError::Conflict("邮箱已存在"));
        }
    }
    let user = db.user_mut(id)?;
    if let Some(name) = name {
        user.name = name;
    }
    if let Some(email) = email {
        user.email = email;
    }
    if let Some(role) = input.role {
        user.role = role;
    }
    if let Some(status) = input.status {
        user.status = status;
    }
    Ok(Json(Envelope::ok(user.clone()).with_message("更新成功")))
}

async fn delete_user(
    State(db): State<SharedDb>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Envelope<()>>, AppError> {
    let mut db = db.write().await;
    let before = db.accounts.len();
    db.accounts.retain(|a| a.user.id != id);
    if db.accounts.len() == before {
        return Err(AppError::NotFound("用户不存在"));
    }
    Ok(Json(Envelope::ok(()).with_message("删除成功")))
}

async fn upload(
    State(db): State<SharedDb>,
    mut multipart: Multipart,
) -> Result<Json<Envelope<StoredFile>>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "upload.bin".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        let stored = StoredFile {
            filename: filename.clone(),
            size: bytes.len() as u64,
        };
        db.write().await.files.insert(filename, bytes);
        return Ok(Json(Envelope::ok(stored).with_message("上传成功")));
    }
    Err(AppError::BadRequest("缺少上传文件".to_string()))
}

async fn download(
    State(db): State<SharedDb>,
    AppPath(name): AppPath<String>,
) -> Result<Response, AppError> {
    let bytes = db
        .read()
        .await
        .files
        .get(&name)
        .cloned()
        .ok_or(AppError::NotFound("文件不存在"))?;
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{name}\""),
        ),
    ];
    Ok((headers, bytes).into_response())
}

async fn slow(AppQuery(query): AppQuery<SlowQuery>) -> Json<Envelope<String>> {
    tokio::time::sleep(Duration::from_millis(query.ms.unwrap_or(1_000))).await;
    Json(Envelope::ok("done".to_string()))
}

async fn forbidden() -> AppError {
    AppError::Forbidden
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("用户名不能为空".to_string()));
    }
    Ok(name.to_string())
}

fn validate_email(email: &str) -> Result<String, AppError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email.to_string()),
        _ => Err(AppError::BadRequest("邮箱格式不正确".to_string())),
    }
}
