use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{
    domain::{RoomId, UserId},
    error::ApiError,
    protocol::{MessagePayload, Page, Room, UserSummary},
};
use url::Url;

use crate::session::Credential;

/// Server-defined page size for message history.
pub const MESSAGE_PAGE_SIZE: u32 = 30;

/// Page size used when resolving a username to a user id.
const USER_SEARCH_PAGE_SIZE: u32 = 50;

/// Short-lived bearer grant returned by sign-in, sign-up and refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthGrant {
    pub authorization: String,
    pub token_expires_in: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAccount {
    pub email: String,
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountUpdate {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    /// Base64 profile picture; empty string clears it.
    pub ava: String,
}

/// Thin typed layer over the REST collaborator. Requests are not retried
/// here; failures surface to the caller with a human-readable reason.
pub struct RestClient {
    http: Client,
    base: Url,
}

impl RestClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut normalized = base_url.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base = Url::parse(&normalized)
            .with_context(|| format!("invalid backend base address: {base_url}"))?;
        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("invalid endpoint path: {path}"))
    }

    fn bearer(builder: RequestBuilder, credential: &Credential) -> RequestBuilder {
        builder.bearer_auth(&credential.token)
    }

    /// Maps failure statuses onto the server's structured error body when
    /// one is present, otherwise onto the bare status.
    async fn expect_ok(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if let Ok(api_error) = response.json::<ApiError>().await {
            return Err(anyhow!("{}", api_error.message));
        }
        Err(anyhow!("request failed with status {status}"))
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        Ok(Self::expect_ok(response)
            .await?
            .json()
            .await
            .context("invalid response body")?)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthGrant> {
        let response = self
            .http
            .post(self.endpoint("auth/login")?)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        Self::read_json(response).await
    }

    pub async fn sign_up(&self, account: &NewAccount) -> Result<AuthGrant> {
        let response = self
            .http
            .post(self.endpoint("api/v1/users/")?)
            .json(account)
            .send()
            .await?;
        Self::read_json(response).await
    }

    pub async fn refresh_token(&self, credential: &Credential) -> Result<AuthGrant> {
        let response = Self::bearer(self.http.get(self.endpoint("auth/refresh-token")?), credential)
            .send()
            .await?;
        Self::read_json(response).await
    }

    pub async fn logout(&self, credential: &Credential) -> Result<()> {
        let response = Self::bearer(self.http.get(self.endpoint("auth/logout")?), credential)
            .send()
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    pub async fn current_user(&self, credential: &Credential) -> Result<UserSummary> {
        let response = Self::bearer(self.http.get(self.endpoint("api/v1/users/me")?), credential)
            .send()
            .await?;
        Self::read_json(response).await
    }

    pub async fn update_account(
        &self,
        credential: &Credential,
        update: &AccountUpdate,
    ) -> Result<()> {
        let response = Self::bearer(self.http.put(self.endpoint("api/v1/users/me")?), credential)
            .json(update)
            .send()
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    pub async fn search_users(
        &self,
        credential: &Credential,
        filter: &str,
    ) -> Result<Page<UserSummary>> {
        let mut url = self.endpoint("api/v1/users/")?;
        url.query_pairs_mut()
            .append_pair("page", "1")
            .append_pair("per_page", &USER_SEARCH_PAGE_SIZE.to_string())
            .append_pair("filter_by", filter);
        let response = Self::bearer(self.http.get(url), credential).send().await?;
        Self::read_json(response).await
    }

    pub async fn first_room_page(&self, credential: &Credential) -> Result<Page<Room>> {
        let response = Self::bearer(self.http.get(self.endpoint("api/v1/projects/")?), credential)
            .send()
            .await?;
        Self::read_json(response).await
    }

    pub async fn create_room(&self, credential: &Credential, title: &str) -> Result<Room> {
        let response = Self::bearer(self.http.post(self.endpoint("api/v1/projects/")?), credential)
            .json(&json!({ "title": title }))
            .send()
            .await?;
        Self::read_json(response).await
    }

    pub async fn delete_room(&self, credential: &Credential, room_id: RoomId) -> Result<()> {
        let url = self.endpoint(&format!("api/v1/projects/{}", room_id.0))?;
        let response = Self::bearer(self.http.delete(url), credential).send().await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    pub async fn leave_room(&self, credential: &Credential, room_id: RoomId) -> Result<()> {
        let url = self.endpoint(&format!("api/v1/projects/{}/leave", room_id.0))?;
        let response = Self::bearer(self.http.delete(url), credential).send().await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    pub async fn invite_participant(
        &self,
        credential: &Credential,
        room_id: RoomId,
        participant: UserId,
    ) -> Result<()> {
        let url = self.endpoint(&format!("api/v1/projects/{}/invite", room_id.0))?;
        let response = Self::bearer(self.http.post(url), credential)
            .json(&json!({ "participant": participant.0 }))
            .send()
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    pub async fn remove_participant(
        &self,
        credential: &Credential,
        room_id: RoomId,
        participant: UserId,
    ) -> Result<()> {
        let url = self.endpoint(&format!("api/v1/projects/{}/remove-participant", room_id.0))?;
        let response = Self::bearer(self.http.delete(url), credential)
            .json(&json!({ "participant": participant.0 }))
            .send()
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    pub async fn designate_coach(
        &self,
        credential: &Credential,
        room_id: RoomId,
        coach: UserId,
    ) -> Result<()> {
        let url = self.endpoint(&format!("api/v1/projects/{}/designate-coach", room_id.0))?;
        let response = Self::bearer(self.http.post(url), credential)
            .json(&json!({ "coach": coach.0 }))
            .send()
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    pub async fn remove_privileges(
        &self,
        credential: &Credential,
        room_id: RoomId,
        coach: UserId,
    ) -> Result<()> {
        let url = self.endpoint(&format!("api/v1/projects/{}/designate-coach", room_id.0))?;
        let response = Self::bearer(self.http.delete(url), credential)
            .json(&json!({ "coach": coach.0 }))
            .send()
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    /// Fetches the newest message page for a room.
    pub async fn first_message_page(
        &self,
        credential: &Credential,
        room_id: RoomId,
        per_page: u32,
    ) -> Result<Page<MessagePayload>> {
        let mut url = self.endpoint(&format!("api/v1/messages/{}", room_id.0))?;
        url.query_pairs_mut()
            .append_pair("page", "1")
            .append_pair("per_page", &per_page.to_string());
        let response = Self::bearer(self.http.get(url), credential).send().await?;
        Self::read_json(response).await
    }

    /// Follows an opaque `next` link from a pagination envelope. Links may
    /// be absolute or server-relative.
    pub async fn follow_page<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        link: &str,
    ) -> Result<Page<T>> {
        let url = match Url::parse(link) {
            Ok(url) => url,
            Err(_) => self
                .base
                .join(link)
                .with_context(|| format!("invalid pagination link: {link}"))?,
        };
        let response = Self::bearer(self.http.get(url), credential).send().await?;
        Self::read_json(response).await
    }
}
