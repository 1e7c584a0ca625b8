//! One-shot local listener for the OAuth redirect
//!
//! The listener serves a single route. The first request on it is handed to the
//! sign-in flow together with a reply slot, and the browser receives whatever
//! the flow answers. Every later request gets a fixed "already handled" page.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::AuthError;

const SUCCESS_HTML: &str = "<html><body><h1>Authentication successful!</h1><p>You may now close this window.</p></body></html>";
const ALREADY_HANDLED_HTML: &str = "<html><body><h1>Sign-in already handled</h1><p>This sign-in attempt has already been processed. You may close this window.</p></body></html>";
const ABORTED_HTML: &str = "<html><body><h1>Sign-in aborted</h1><p>Run 'drivebox auth in' to try again.</p></body></html>";

/// Query parameters of the redirect request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthorizationCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Answer sent back to the browser for the honored callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackReply {
    pub status: StatusCode,
    pub body: String,
}

impl CallbackReply {
    pub fn success() -> Self {
        Self {
            status: StatusCode::OK,
            body: SUCCESS_HTML.to_string(),
        }
    }

    pub fn failure(error: &AuthError) -> Self {
        Self {
            status: error.status_code(),
            body: render_error_page(error),
        }
    }
}

impl IntoResponse for CallbackReply {
    fn into_response(self) -> Response {
        html_response(self.status, self.body)
    }
}

/// The honored callback, awaiting the flow's reply
#[derive(Debug)]
pub struct PendingCallback {
    pub params: AuthorizationCallback,
    reply: oneshot::Sender<CallbackReply>,
}

impl PendingCallback {
    /// Send the browser its response; a browser that already disconnected is ignored
    pub fn respond(self, reply: CallbackReply) {
        if self.reply.send(reply).is_err() {
            tracing::debug!("Browser disconnected before the callback reply was sent");
        }
    }
}

#[derive(Clone)]
struct CallbackState {
    inbox: mpsc::Sender<PendingCallback>,
    claimed: Arc<AtomicBool>,
}

/// Local HTTP listener bound for one sign-in attempt
///
/// Owned by the flow invocation; dropping it without `shutdown` still closes
/// the socket, since the server task is aborted.
pub struct CallbackListener {
    addr: SocketAddr,
    inbox: mpsc::Receiver<PendingCallback>,
    shutdown: CancellationToken,
    server: Option<JoinHandle<std::io::Result<()>>>,
}

impl CallbackListener {
    /// Bind `host:port` and start serving `path`
    pub async fn bind(host: &str, port: u16, path: &str) -> Result<Self, AuthError> {
        let addr_text = format!("{}:{}", host, port);
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| AuthError::ListenerBindFailed {
                addr: addr_text.clone(),
                reason: e.to_string(),
            })?;
        let addr = listener.local_addr().map_err(|e| AuthError::ListenerBindFailed {
            addr: addr_text.clone(),
            reason: e.to_string(),
        })?;

        let (tx, rx) = mpsc::channel(1);
        let state = CallbackState {
            inbox: tx,
            claimed: Arc::new(AtomicBool::new(false)),
        };
        let app = Router::new()
            .route(path, get(handle_callback))
            .with_state(state);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        tracing::info!("Callback listener started on http://{}{}", addr, path);
        Ok(Self {
            addr,
            inbox: rx,
            shutdown,
            server: Some(server),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the first callback request, bounded by `timeout` and `cancel`
    pub async fn next_callback(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PendingCallback, AuthError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AuthError::FlowCancelled),
            received = tokio::time::timeout(timeout, self.inbox.recv()) => match received {
                Ok(Some(pending)) => Ok(pending),
                // The sender lives in the router state, so a closed channel means the server stopped.
                Ok(None) => Err(AuthError::FlowCancelled),
                Err(_) => Err(AuthError::FlowTimedOut {
                    waited_secs: timeout.as_secs(),
                }),
            },
        }
    }

    /// Stop accepting, let in-flight responses flush for up to `grace`, then close.
    ///
    /// The socket is released when this returns.
    pub async fn shutdown(mut self, grace: Duration) {
        self.shutdown.cancel();
        // Drop queued callbacks so their handlers answer immediately.
        self.inbox.close();
        while let Ok(pending) = self.inbox.try_recv() {
            drop(pending);
        }

        let Some(mut server) = self.server.take() else {
            return;
        };
        match tokio::time::timeout(grace, &mut server).await {
            Ok(Ok(Ok(()))) => tracing::debug!("Callback listener on {} closed", self.addr),
            Ok(Ok(Err(e))) => tracing::warn!("Callback listener on {} failed: {}", self.addr, e),
            Ok(Err(e)) => tracing::warn!("Callback listener task failed: {}", e),
            Err(_) => {
                tracing::debug!("Grace period elapsed, closing callback listener on {}", self.addr);
                server.abort();
                let _ = server.await;
            }
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            self.shutdown.cancel();
            server.abort();
        }
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<AuthorizationCallback>,
) -> Response {
    if state.claimed.swap(true, Ordering::SeqCst) {
        tracing::debug!("Ignoring repeated callback request");
        return html_response(StatusCode::OK, ALREADY_HANDLED_HTML.to_string());
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    let pending = PendingCallback {
        params,
        reply: reply_tx,
    };
    if state.inbox.send(pending).await.is_err() {
        return html_response(StatusCode::SERVICE_UNAVAILABLE, ABORTED_HTML.to_string());
    }

    match reply_rx.await {
        Ok(reply) => reply.into_response(),
        Err(_) => html_response(StatusCode::INTERNAL_SERVER_ERROR, ABORTED_HTML.to_string()),
    }
}

fn html_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response()
}

fn render_error_page(error: &AuthError) -> String {
    format!(
        "<html><body><h1>Authentication failed</h1><p>{}</p><p>{}</p></body></html>",
        escape_html(&error.to_string()),
        escape_html(error.remedy())
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback_url(listener: &CallbackListener, query: &str) -> String {
        format!("http://{}/oauth/callback?{}", listener.local_addr(), query)
    }

    #[tokio::test]
    async fn test_first_request_reaches_flow_and_gets_its_reply() {
        let mut listener = CallbackListener::bind("127.0.0.1", 0, "/oauth/callback").await.unwrap();
        let url = callback_url(&listener, "code=ABC123&state=xyz");
        let browser = tokio::spawn(async move { reqwest::get(url).await.unwrap() });

        let pending = listener
            .next_callback(Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(pending.params.code.as_deref(), Some("ABC123"));
        assert_eq!(pending.params.state.as_deref(), Some("xyz"));
        assert!(pending.params.error.is_none());
        pending.respond(CallbackReply::success());

        let response = browser.await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(response.text().await.unwrap().contains("Authentication successful"));
        listener.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_repeated_request_is_already_handled() {
        let mut listener = CallbackListener::bind("127.0.0.1", 0, "/oauth/callback").await.unwrap();
        let first_url = callback_url(&listener, "code=one&state=s");
        let second_url = callback_url(&listener, "code=two&state=s");

        let first = tokio::spawn(async move { reqwest::get(first_url).await.unwrap() });
        let pending = listener
            .next_callback(Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();

        let second = reqwest::get(second_url).await.unwrap();
        assert_eq!(second.status(), reqwest::StatusCode::OK);
        assert!(second.text().await.unwrap().contains("already been processed"));

        pending.respond(CallbackReply::failure(&AuthError::MissingCode));
        assert_eq!(first.await.unwrap().status(), reqwest::StatusCode::BAD_REQUEST);
        listener.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_other_paths_are_not_found() {
        let listener = CallbackListener::bind("127.0.0.1", 0, "/oauth/callback").await.unwrap();
        let url = format!("http://{}/favicon.ico", listener.local_addr());
        let response = reqwest::get(url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        listener.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_timeout_without_callback() {
        let mut listener = CallbackListener::bind("127.0.0.1", 0, "/oauth/callback").await.unwrap();
        let err = listener
            .next_callback(Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::FlowTimedOut { .. }));
        listener.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_cancellation_while_listening() {
        let mut listener = CallbackListener::bind("127.0.0.1", 0, "/oauth/callback").await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = listener
            .next_callback(Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::FlowCancelled));
        listener.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_port_released_after_shutdown() {
        let listener = CallbackListener::bind("127.0.0.1", 0, "/oauth/callback").await.unwrap();
        let port = listener.local_addr().port();

        let err = CallbackListener::bind("127.0.0.1", port, "/oauth/callback")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AuthError::ListenerBindFailed { .. }));

        listener.shutdown(Duration::from_secs(1)).await;
        assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[test]
    fn test_error_page_is_escaped() {
        let err = AuthError::AuthorizationDenied {
            error: "<script>".to_string(),
            description: None,
        };
        let reply = CallbackReply::failure(&err);
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert!(reply.body.contains("&lt;script&gt;"));
        assert!(!reply.body.contains("<script>"));
    }
}
