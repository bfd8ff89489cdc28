//! Typed access to the admin backend's auth and user endpoints.

use uuid::Uuid;

use crate::client::ApiClient;
use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::types::{CreateUser, LoginRequest, LoginResponse, UpdateUser, User, UserQuery};

#[derive(Clone, Copy)]
pub struct UserService<'a> {
    client: &'a ApiClient,
}

impl<'a> UserService<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// Sign in and persist the returned token for later calls.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<LoginResponse, ApiError> {
        let envelope: Envelope<LoginResponse> = self.client.post("/auth/login", credentials).await?;
        self.client.set_token(&envelope.data.token);
        Ok(envelope.data)
    }

    /// Sign out server-side, then forget the token locally.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let result: Result<Envelope<()>, ApiError> =
            self.client.post("/auth/logout", &serde_json::json!({})).await;
        self.client.clear_token();
        result.map(|_| ())
    }

    /// One page of users; the envelope carries the pagination metadata.
    pub async fn get_users(&self, query: &UserQuery) -> Result<Envelope<Vec<User>>, ApiError> {
        self.client.get_with_params("/users", query).await
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, ApiError> {
        self.client
            .get(&format!("/users/{id}"))
            .await
            .map(Envelope::into_data)
    }

    pub async fn create_user(&self, input: &CreateUser) -> Result<User, ApiError> {
        self.client
            .post("/users", input)
            .await
            .map(Envelope::into_data)
    }

    pub async fn update_user(&self, id: Uuid, input: &UpdateUser) -> Result<User, ApiError> {
        self.client
            .put(&format!("/users/{id}"), input)
            .await
            .map(Envelope::into_data)
    }

    pub async fn patch_user(&self, id: Uuid, input: &UpdateUser) -> Result<User, ApiError> {
        self.client
            .patch(&format!("/users/{id}"), input)
            .await
            .map(Envelope::into_data)
    }

    pub async fn delete_user(&self, id: Uuid) -> Result<(), ApiError> {
        self.client
            .delete::<()>(&format!("/users/{id}"))
            .await
            .map(|_| ())
    }
}
