//! `reqwest` implementation of [`ConversationStore`].
//!
//! Endpoints:
//! - `GET   /circulars?circular_id=<id>`        circular + references
//! - `GET   /circulars[?bookmark=true|?year=&month=]` catalog listing
//! - `PATCH /circulars`                         partial update
//! - `POST  /conversations/new`                 create
//! - `GET   /conversations/{id}?db_name=`       load
//! - `POST  /conversations/{id}`                ask

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use circulars_core::{
    Answer, BackendConfig, Circular, CircularPatch, CircularQuery, CircularRecord,
    CircularsError, Conversation, NewConversation, Result,
};

use crate::store::ConversationStore;

#[derive(Serialize)]
struct NewConversationBody<'a> {
    db_name: &'a str,
}

#[derive(Serialize)]
struct QuestionBody<'a> {
    db_name: &'a str,
    question: &'a str,
}

/// HTTP client for the circulars backend.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpConversationStore {
    client: Client,
    base_url: Url,
    config: BackendConfig,
}

impl HttpConversationStore {
    /// Build a client for the configured backend.
    pub fn new(config: BackendConfig) -> Result<Self> {
        config.validate()?;

        let base_url = Url::parse(config.trimmed_base_url()).map_err(|e| {
            CircularsError::Config(format!("invalid base_url {}: {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CircularsError::Config(format!(
                "base_url cannot carry paths: {}",
                config.base_url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| CircularsError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, op: &'static str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| request_error(op, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(op, status, &body))
    }

    async fn decode<T: DeserializeOwned>(&self, op: &'static str, response: Response) -> Result<T> {
        let bytes = response.bytes().await.map_err(|e| request_error(op, e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CircularsError::Serialization(format!("{}: {}", op, e)))
    }
}

#[async_trait]
impl ConversationStore for HttpConversationStore {
    async fn get_circular(&self, circular_id: &str) -> Result<CircularRecord> {
        tracing::debug!(circular_id = %circular_id, "GET circular");
        let request = self
            .client
            .get(self.endpoint(&["circulars"]))
            .query(&[("circular_id", circular_id)]);
        let response = self.send("get_circular", request).await?;

        // The backend answers an unknown id with `null` rather than a 404.
        let record: Option<CircularRecord> = self.decode("get_circular", response).await?;
        record.ok_or_else(|| CircularsError::NotFound(format!("circular {}", circular_id)))
    }

    async fn list_circulars(&self, query: CircularQuery) -> Result<Vec<Circular>> {
        query.validate()?;
        tracing::debug!(query = ?query, "GET circulars");

        let mut request = self.client.get(self.endpoint(&["circulars"]));
        request = match query {
            CircularQuery::All => request,
            CircularQuery::Bookmarked => request.query(&[("bookmark", "true")]),
            CircularQuery::Published { year, month } => {
                request.query(&[("year", year.to_string()), ("month", month.to_string())])
            }
        };
        let response = self.send("list_circulars", request).await?;
        let circulars: Option<Vec<Circular>> = self.decode("list_circulars", response).await?;
        Ok(circulars.unwrap_or_default())
    }

    async fn update_circular(&self, patch: &CircularPatch) -> Result<()> {
        tracing::debug!(circular_id = %patch.circular_id, "PATCH circular");
        let request = self.client.patch(self.endpoint(&["circulars"])).json(patch);
        self.send("update_circular", request).await?;
        Ok(())
    }

    async fn create_conversation(&self) -> Result<String> {
        let request = self
            .client
            .post(self.endpoint(&["conversations", "new"]))
            .json(&NewConversationBody {
                db_name: &self.config.db_name,
            });
        let response = self.send("create_conversation", request).await?;
        let created: NewConversation = self.decode("create_conversation", response).await?;
        if created.conversation_id.trim().is_empty() {
            return Err(CircularsError::Transport(
                "create_conversation: backend returned an empty conversation id".to_string(),
            ));
        }
        tracing::debug!(conversation_id = %created.conversation_id, "Conversation created");
        Ok(created.conversation_id)
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        tracing::debug!(conversation_id = %conversation_id, "GET conversation");
        let request = self
            .client
            .get(self.endpoint(&["conversations", conversation_id]))
            .query(&[("db_name", self.config.db_name.as_str())]);
        let response = self.send("get_conversation", request).await?;
        self.decode("get_conversation", response).await
    }

    async fn post_question(&self, conversation_id: &str, question: &str) -> Result<Answer> {
        tracing::debug!(conversation_id = %conversation_id, "POST question");
        let request = self
            .client
            .post(self.endpoint(&["conversations", conversation_id]))
            .timeout(self.config.answer_timeout())
            .json(&QuestionBody {
                db_name: &self.config.db_name,
                question,
            });
        let response = self.send("post_question", request).await?;
        self.decode("post_question", response).await
    }
}

/// Map a failed send (no HTTP status available) onto the error taxonomy.
fn request_error(op: &str, err: reqwest::Error) -> CircularsError {
    if err.is_timeout() {
        CircularsError::Timeout(format!("{}: {}", op, err))
    } else if err.is_decode() {
        CircularsError::Serialization(format!("{}: {}", op, err))
    } else {
        CircularsError::Transport(format!("{}: {}", op, err))
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
fn status_error(op: &str, status: StatusCode, body: &str) -> CircularsError {
    let detail = if body.is_empty() {
        format!("{}: HTTP {}", op, status.as_u16())
    } else {
        format!("{}: HTTP {}: {}", op, status.as_u16(), body)
    };
    match status {
        StatusCode::NOT_FOUND => CircularsError::NotFound(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            CircularsError::Timeout(detail)
        }
        _ => CircularsError::Transport(detail),
    }
}
