//! REST collaborator: conversation list, history pages and the durable write.

use async_trait::async_trait;
use chatsync_shared::{
    ApiError, Conversation, ConversationId, CreateMessageRequest, Message, PagedResponse,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth_session::bearer;

/// The REST operations the core consumes. Results are assumed eventually
/// consistent with the live channel.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    /// One page of history, oldest first within the page.
    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<PagedResponse<Message>, ApiError>;

    /// Durable write. Its success is the authoritative record of the message.
    async fn create_message(&self, request: &CreateMessageRequest) -> Result<Message, ApiError>;
}

/// HTTP client for the REST collaborator.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            token: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Bearer token attached to every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => rb.header(reqwest::header::AUTHORIZATION, bearer(token)),
            None => rb,
        }
    }

    /// GET a JSON resource
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let rb = self.authorize(self.client.get(self.url(path)));
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
        read_json(resp).await
    }

    /// POST a JSON body
    pub async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let rb = self.authorize(self.client.post(self.url(path))).json(body);
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;
        read_json(resp).await
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_json<TRes: DeserializeOwned>(resp: reqwest::Response) -> Result<TRes, ApiError> {
    let status = resp.status().as_u16();
    let is_success = resp.status().is_success();
    let text = resp
        .text()
        .await
        .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

    if !is_success {
        return Err(ApiError::Http { status, body: text });
    }

    if text.is_empty() {
        serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
    } else {
        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }
}

fn messages_path(conversation_id: &ConversationId, cursor: Option<&str>, limit: u32) -> String {
    let mut path = format!(
        "/api/conversations/{}/messages?limit={}",
        urlencoding::encode(conversation_id.as_str()),
        limit
    );
    if let Some(cursor) = cursor {
        path.push_str("&cursor=");
        path.push_str(&urlencoding::encode(cursor));
    }
    path
}

#[async_trait]
impl ConversationApi for ApiClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.get_json("/api/conversations").await
    }

    async fn fetch_messages(
        &self,
        conversation_id: &ConversationId,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<PagedResponse<Message>, ApiError> {
        self.get_json(&messages_path(conversation_id, cursor, limit))
            .await
    }

    async fn create_message(&self, request: &CreateMessageRequest) -> Result<Message, ApiError> {
        let path = format!(
            "/api/conversations/{}/messages",
            urlencoding::encode(request.conversation_id.as_str())
        );
        self.post_json(&path, request).await
    }
}
