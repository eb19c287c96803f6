//! reqwest implementation of the REST message API.

use futures::future::BoxFuture;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::MessageApi;
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::model::{Message, SendPayload, UserId, UserProfile};

/// HTTP client for the chat backend's REST endpoints.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

/// Error body shape the backend uses for non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl RestClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(ApiError::Http)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        debug!(path, "GET");
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<T, ApiError> {
        debug!(path, "POST");
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(ApiError::from_reqwest);
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.message)
            .unwrap_or_else(|_| format!("request failed with status {status}"));
        Err(ApiError::Server { status, message })
    }
}

impl MessageApi for RestClient {
    fn list_partners(&self) -> BoxFuture<'_, Result<Vec<UserProfile>, ApiError>> {
        Box::pin(self.get_json("/messages/users"))
    }

    fn list_messages<'a>(
        &'a self,
        peer_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Message>, ApiError>> {
        Box::pin(async move { self.get_json(&format!("/messages/{peer_id}")).await })
    }

    fn send_message<'a>(
        &'a self,
        peer_id: &'a str,
        payload: &'a SendPayload,
    ) -> BoxFuture<'a, Result<Message, ApiError>> {
        Box::pin(async move {
            self.post_json(&format!("/messages/send/{peer_id}"), payload)
                .await
        })
    }

    fn list_online_users(&self) -> BoxFuture<'_, Result<Vec<UserId>, ApiError>> {
        Box::pin(self.get_json("/auth/online-users"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::get, routing::post};

    fn client_for(port: u16) -> RestClient {
        RestClient::new(&ApiConfig {
            base_url: format!("http://127.0.0.1:{port}/api"),
            timeout_secs: 5,
        })
        .unwrap()
    }

    /// Spawn a stub backend and return its port plus a shutdown handle.
    async fn spawn_stub(router: Router) -> (u16, tokio::sync::oneshot::Sender<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });
        (port, tx)
    }

    #[tokio::test]
    async fn list_online_users_decodes_id_array() {
        let router = Router::new().route(
            "/api/auth/online-users",
            get(|| async { Json(vec!["u1".to_string(), "u2".to_string()]) }),
        );
        let (port, _shutdown) = spawn_stub(router).await;

        let ids = client_for(port).list_online_users().await.unwrap();
        assert_eq!(ids, vec!["u1".to_string(), "u2".to_string()]);
    }

    #[tokio::test]
    async fn send_message_posts_payload_and_decodes_confirmation() {
        let router = Router::new().route(
            "/api/messages/send/{peer}",
            post(
                |axum::extract::Path(peer): axum::extract::Path<String>,
                 Json(payload): Json<serde_json::Value>| async move {
                    assert_eq!(payload["text"], "hi");
                    Json(serde_json::json!({
                        "_id": "s1",
                        "senderId": "me",
                        "receiverId": peer,
                        "text": "hi",
                        "createdAt": "2024-03-01T10:00:00Z",
                    }))
                },
            ),
        );
        let (port, _shutdown) = spawn_stub(router).await;

        let message = client_for(port)
            .send_message("u2", &SendPayload::text("hi"))
            .await
            .unwrap();
        assert_eq!(message.id, "s1");
        assert_eq!(message.receiver_id, "u2");
    }

    #[tokio::test]
    async fn error_body_message_is_surfaced() {
        let router = Router::new().route(
            "/api/messages/{peer}",
            get(|| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({"message": "User not found"})),
                )
            }),
        );
        let (port, _shutdown) = spawn_stub(router).await;

        let err = client_for(port).list_messages("nobody").await.unwrap_err();
        match err {
            ApiError::Server { status, message } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(message, "User not found");
            }
            other => panic!("expected Server error, got: {other}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_body_gets_generic_message() {
        let router = Router::new().route(
            "/api/messages/users",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let (port, _shutdown) = spawn_stub(router).await;

        let err = client_for(port).list_partners().await.unwrap_err();
        assert!(err.to_string().contains("500"), "got: {err}");
    }

    #[tokio::test]
    async fn unreachable_server_yields_unavailable() {
        // Port 1 is reserved; nothing listens there
        let err = client_for(1).list_partners().await.unwrap_err();
        assert!(matches!(err, ApiError::Unavailable));
    }
}
