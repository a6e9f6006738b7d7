//! Adapts one backend call into a three-phase frame stream.

use std::sync::Arc;

use futures::Stream;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use tutor_protocol::{AskRequest, Frame, FrameEvent};

use crate::config::ProxyConfig;
use crate::error::{Error, Result};

/// Stateless forwarder; clones share one HTTP client.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    config: Arc<ProxyConfig>,
}

impl Forwarder {
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: ProxyConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Frames for one request: `ready`, then `chunk` or `error`, then `done`.
    ///
    /// `ready` is yielded before the backend call starts. The backend call
    /// lives inside the stream, so dropping the stream (e.g. because the
    /// client disconnected) aborts it and nothing else is emitted.
    pub fn forward(&self, request: AskRequest) -> impl Stream<Item = Frame> + Send + 'static {
        let this = self.clone();
        async_stream::stream! {
            yield Frame::json(
                FrameEvent::Ready,
                &json!({ "backend": this.config.backend_url }),
            );

            match this.ask(&request).await {
                Ok(payload) => yield Frame::json(FrameEvent::Chunk, &payload),
                Err(err) => {
                    warn!(error = %err, user_id = %request.user_id, "backend call failed");
                    yield Frame::new(FrameEvent::Error, err.to_string());
                }
            }

            yield Frame::json(FrameEvent::Done, &Value::Object(Map::new()));
        }
    }

    /// One backend call. A success body that is not JSON becomes `{}`.
    async fn ask(&self, request: &AskRequest) -> Result<Value> {
        let url = self.config.ask_url();
        let mut req = self.client.post(&url).json(request);
        if let Some(timeout) = self.config.backend_timeout {
            req = req.timeout(timeout);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown status").to_string()
            } else {
                body
            };
            return Err(Error::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await?;
        debug!(%url, bytes = body.len(), "backend responded");
        Ok(serde_json::from_str(&body).unwrap_or_else(|err| {
            warn!(error = %err, "backend body is not JSON; forwarding an empty object");
            Value::Object(Map::new())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use futures::StreamExt;
    use std::net::SocketAddr;
    use std::time::Duration;

    async fn spawn_backend(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind backend");
        let addr = listener.local_addr().expect("backend addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    fn forwarder_for(addr: SocketAddr) -> Forwarder {
        Forwarder::new(ProxyConfig {
            backend_url: format!("http://{addr}"),
            ..Default::default()
        })
    }

    fn kinds(frames: &[Frame]) -> Vec<FrameEvent> {
        frames.iter().filter_map(Frame::kind).collect()
    }

    #[tokio::test]
    async fn success_yields_ready_chunk_done() {
        let backend = Router::new().route(
            "/api/ask",
            post(|axum::Json(body): axum::Json<Value>| async move {
                axum::Json(json!({"title": "Echo", "asked": body["message"]}))
            }),
        );
        let addr = spawn_backend(backend).await;

        let frames: Vec<Frame> = forwarder_for(addr)
            .forward(AskRequest::new("What is spear phishing?"))
            .collect()
            .await;

        assert_eq!(
            kinds(&frames),
            vec![FrameEvent::Ready, FrameEvent::Chunk, FrameEvent::Done]
        );
        assert_eq!(frames[0].data, json!({"backend": format!("http://{addr}")}).to_string());
        let chunk: Value = serde_json::from_str(&frames[1].data).expect("chunk json");
        assert_eq!(
            chunk,
            json!({"title": "Echo", "asked": "What is spear phishing?"})
        );
    }

    #[tokio::test]
    async fn backend_error_status_yields_error_and_no_chunk() {
        let backend = Router::new().route(
            "/api/ask",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "internal error") }),
        );
        let addr = spawn_backend(backend).await;

        let frames: Vec<Frame> = forwarder_for(addr)
            .forward(AskRequest::new("hi"))
            .collect()
            .await;

        assert_eq!(
            kinds(&frames),
            vec![FrameEvent::Ready, FrameEvent::Error, FrameEvent::Done]
        );
        assert!(frames[1].data.contains("500"), "{}", frames[1].data);
        assert!(frames[1].data.contains("internal error"), "{}", frames[1].data);
    }

    #[tokio::test]
    async fn empty_error_body_falls_back_to_status_text() {
        let backend = Router::new().route("/api/ask", post(|| async { StatusCode::BAD_GATEWAY }));
        let addr = spawn_backend(backend).await;

        let frames: Vec<Frame> = forwarder_for(addr)
            .forward(AskRequest::new("hi"))
            .collect()
            .await;

        assert_eq!(frames[1].data, "Backend error 502: Bad Gateway");
    }

    #[tokio::test]
    async fn non_json_success_body_becomes_empty_object() {
        let backend = Router::new().route("/api/ask", post(|| async { "<html>oops</html>" }));
        let addr = spawn_backend(backend).await;

        let frames: Vec<Frame> = forwarder_for(addr)
            .forward(AskRequest::new("hi"))
            .collect()
            .await;

        assert_eq!(
            kinds(&frames),
            vec![FrameEvent::Ready, FrameEvent::Chunk, FrameEvent::Done]
        );
        assert_eq!(frames[1].data, "{}");
    }

    #[tokio::test]
    async fn unreachable_backend_yields_error_then_done() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let frames: Vec<Frame> = forwarder_for(addr)
            .forward(AskRequest::new("hi"))
            .collect()
            .await;

        assert_eq!(
            kinds(&frames),
            vec![FrameEvent::Ready, FrameEvent::Error, FrameEvent::Done]
        );
        assert!(!frames[1].data.is_empty());
    }

    #[tokio::test]
    async fn backend_timeout_is_reported_as_error() {
        let backend = Router::new().route(
            "/api/ask",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "{}"
            }),
        );
        let addr = spawn_backend(backend).await;
        let forwarder = Forwarder::new(ProxyConfig {
            backend_url: format!("http://{addr}"),
            backend_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        });

        let frames: Vec<Frame> = forwarder.forward(AskRequest::new("hi")).collect().await;
        assert_eq!(
            kinds(&frames),
            vec![FrameEvent::Ready, FrameEvent::Error, FrameEvent::Done]
        );
    }

    #[tokio::test]
    async fn ready_is_emitted_before_the_backend_answers() {
        let backend = Router::new().route(
            "/api/ask",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "{}"
            }),
        );
        let addr = spawn_backend(backend).await;

        let mut frames = Box::pin(forwarder_for(addr).forward(AskRequest::new("hi")));
        let first = tokio::time::timeout(Duration::from_secs(1), frames.next())
            .await
            .expect("ready arrives without waiting on the backend")
            .expect("a frame");
        assert_eq!(first.kind(), Some(FrameEvent::Ready));

        // The backend is still working; dropping the stream must not block.
        let pending = tokio::time::timeout(Duration::from_millis(100), frames.next()).await;
        assert!(pending.is_err());
        drop(frames);
    }
}
