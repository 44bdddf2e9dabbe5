//! `reqwest` implementation of [`RemoteClient`].

use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode, header::AUTHORIZATION};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    ApiError, ApiResult, Community, Conversation, DeleteOutcome, HistoryCursor,
    MAX_HISTORY_LIMIT, Message, RemoteClient, SearchPage, SearchQuery, SkipReason, User, buckets,
};
use crate::{
    config::ApiConfig,
    ratelimit::{ApiResponse, RateLimiter, TransportError},
};

/// HTTP client for the remote API.
///
/// Every call goes through the shared [`RateLimiter`]; the credential can be
/// swapped at any time and applies to calls enqueued afterwards.
pub struct HttpClient {
    http: reqwest::Client,
    limiter: RateLimiter,
    base_url: String,
    include_nsfw: bool,
    credential: RwLock<Option<String>>,
}

impl HttpClient {
    pub fn new(config: &ApiConfig, limiter: RateLimiter) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {e}")))?;

        let client = Self {
            http,
            limiter,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            include_nsfw: config.include_nsfw,
            credential: RwLock::new(None),
        };
        if let Some(token) = &config.token {
            client.set_credential(token.clone());
        }
        Ok(client)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: Vec<(&'static str, String)>,
        bucket: &str,
    ) -> ApiResult<ApiResponse> {
        let credential = self
            .credential
            .read()
            .clone()
            .ok_or(ApiError::MissingCredential)?;
        let url = format!("{}{}", self.base_url, path);
        let http = self.http.clone();
        let request_method = method.clone();

        let response = self
            .limiter
            .enqueue(bucket, move || {
                let request = http
                    .request(request_method.clone(), &url)
                    .header(AUTHORIZATION, &credential)
                    .query(&query);
                async move {
                    let response = request.send().await?;
                    buffer_response(response).await
                }
            })
            .await?;

        debug!(
            method = %method,
            path = %path,
            bucket = %bucket,
            status = response.status().as_u16(),
            "Remote call completed"
        );
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: String,
        query: Vec<(&'static str, String)>,
        bucket: &str,
    ) -> ApiResult<T> {
        let response = self.send(Method::GET, &path, query, bucket).await?;
        let response = ensure_success("GET", &path, response)?;
        serde_json::from_slice(response.body()).map_err(|e| ApiError::Decode {
            path,
            message: e.to_string(),
        })
    }

    async fn search(
        &self,
        path: String,
        scope_id: &str,
        query: &SearchQuery,
        include_nsfw: bool,
    ) -> ApiResult<SearchPage> {
        let mut pairs = query.to_pairs();
        if include_nsfw {
            pairs.push(("include_nsfw", "true".to_string()));
        }
        self.get_json(path, pairs, &buckets::search(scope_id)).await
    }
}

#[async_trait]
impl RemoteClient for HttpClient {
    fn set_credential(&self, credential: String) {
        let credential = credential.trim().to_string();
        *self.credential.write() = (!credential.is_empty()).then_some(credential);
    }

    fn has_credential(&self) -> bool {
        self.credential.read().is_some()
    }

    async fn current_user(&self) -> ApiResult<User> {
        self.get_json("/users/@me".into(), Vec::new(), buckets::IDENTITY)
            .await
    }

    async fn list_communities(&self) -> ApiResult<Vec<Community>> {
        self.get_json("/users/@me/guilds".into(), Vec::new(), buckets::COMMUNITIES)
            .await
    }

    async fn list_conversations(&self) -> ApiResult<Vec<Conversation>> {
        self.get_json(
            "/users/@me/channels".into(),
            Vec::new(),
            buckets::CONVERSATIONS,
        )
        .await
    }

    async fn search_community(
        &self,
        community_id: &str,
        query: &SearchQuery,
    ) -> ApiResult<SearchPage> {
        let path = format!("/guilds/{community_id}/messages/search");
        self.search(path, community_id, query, self.include_nsfw)
            .await
    }

    async fn search_conversation(
        &self,
        conversation_id: &str,
        query: &SearchQuery,
    ) -> ApiResult<SearchPage> {
        let path = format!("/channels/{conversation_id}/messages/search");
        self.search(path, conversation_id, query, false).await
    }

    async fn channel_history(
        &self,
        channel_id: &str,
        cursor: &HistoryCursor,
        limit: u8,
    ) -> ApiResult<Vec<Message>> {
        let mut pairs = Vec::with_capacity(2);
        if let Some((name, id)) = cursor.as_pair() {
            pairs.push((name, id.to_string()));
        }
        pairs.push(("limit", limit.clamp(1, MAX_HISTORY_LIMIT).to_string()));

        self.get_json(
            format!("/channels/{channel_id}/messages"),
            pairs,
            &buckets::history(channel_id),
        )
        .await
    }

    async fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> ApiResult<DeleteOutcome> {
        let path = format!("/channels/{channel_id}/messages/{message_id}");
        let response = self
            .send(Method::DELETE, &path, Vec::new(), &buckets::delete(channel_id))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::Skipped(SkipReason::NotFound)),
            StatusCode::FORBIDDEN => Ok(DeleteOutcome::Skipped(SkipReason::Permission)),
            _ => ensure_success("DELETE", &path, response).map(|_| DeleteOutcome::Deleted),
        }
    }
}

async fn buffer_response(response: reqwest::Response) -> Result<ApiResponse, TransportError> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;

    let mut built = http::Response::builder()
        .status(status)
        .body(body)
        .map_err(|e| TransportError(e.to_string()))?;
    *built.headers_mut() = headers;
    Ok(built)
}

fn ensure_success(method: &'static str, path: &str, response: ApiResponse) -> ApiResult<ApiResponse> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(ApiError::Status {
        status: response.status().as_u16(),
        method,
        path: path.to_string(),
        body: String::from_utf8_lossy(response.body()).into_owned(),
    })
}
