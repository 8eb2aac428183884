//! Ephemeral loopback server for the OAuth2 redirect
//!
//! Serves a single `GET /callback` route for one authorization attempt. The
//! first callback that either carries a valid code or fails validation
//! resolves the attempt through a one-shot slot; the handler never waits on
//! the receiver. Anything arriving after that is answered and logged but
//! otherwise ignored.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FlowError;

/// Shown in the browser tab once the code has been captured.
pub const SUCCESS_MESSAGE: &str =
    "Authorization successful. You can close this tab and return to the agent.";

/// How long `shutdown` waits for in-flight responses before aborting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on any single request to the listener.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type Outcome = Result<String, FlowError>;

#[derive(Debug, Deserialize)]
struct CallbackParams {
    state: Option<String>,
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    slot: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

impl CallbackState {
    /// Resolve the attempt. Returns false when it was already resolved.
    fn deliver(&self, outcome: Outcome) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if params.state.as_deref() != Some(&*state.expected_state) {
        if !state.deliver(Err(FlowError::InvalidState)) {
            warn!("late callback with invalid state discarded");
        }
        return (StatusCode::BAD_REQUEST, "Invalid state").into_response();
    }

    if let Some(error) = params.error {
        let detail = match params.error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        if !state.deliver(Err(FlowError::Denied(detail))) {
            warn!("late authorization error discarded");
        }
        return (StatusCode::BAD_REQUEST, "Authorization denied").into_response();
    }

    let code = match params.code {
        Some(code) if !code.is_empty() => code,
        _ => {
            if !state.deliver(Err(FlowError::MissingCode)) {
                warn!("late callback without code discarded");
            }
            return (StatusCode::BAD_REQUEST, "No code").into_response();
        }
    };

    if !state.deliver(Ok(code)) {
        warn!("authorization code arrived after the attempt was resolved, discarding");
        return (StatusCode::CONFLICT, "Authorization already completed").into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        SUCCESS_MESSAGE,
    )
        .into_response()
}

fn router(state: CallbackState) -> Router {
    let app = Router::new()
        .route("/callback", get(handle_callback))
        .with_state(state);
    with_request_timeout(app, REQUEST_TIMEOUT)
}

fn with_request_timeout(app: Router, timeout: Duration) -> Router {
    app.layer(middleware::from_fn_with_state(timeout, request_timeout))
}

async fn request_timeout(State(timeout): State<Duration>, request: Request, next: Next) -> Response {
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "callback request timed out");
            StatusCode::REQUEST_TIMEOUT.into_response()
        }
    }
}

/// A running callback listener. Always call `shutdown` when done with it.
pub struct CallbackServer {
    addr: SocketAddr,
    outcome: Option<oneshot::Receiver<Outcome>>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind `host:port` and start serving in the background.
    pub async fn start(host: &str, port: u16, expected_state: &str) -> Result<Self, FlowError> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| FlowError::CallbackServer(format!("binding {host}:{port}: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| FlowError::CallbackServer(format!("reading bound address: {e}")))?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let app = router(CallbackState {
            expected_state: Arc::from(expected_state),
            slot: Arc::new(Mutex::new(Some(outcome_tx))),
        });

        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "callback server stopped with error");
            }
        });

        info!(%addr, "callback server listening");
        Ok(Self {
            addr,
            outcome: Some(outcome_rx),
            stop: Some(stop_tx),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the first resolution, the TTL, or cancellation, whichever
    /// comes first. Only the first call can succeed.
    pub async fn wait(&mut self, ttl: Duration, cancel: &CancellationToken) -> Result<String, FlowError> {
        let outcome = self
            .outcome
            .take()
            .ok_or_else(|| FlowError::CallbackServer("callback already awaited".into()))?;

        tokio::select! {
            received = outcome => match received {
                Ok(result) => result,
                Err(_) => Err(FlowError::CallbackServer("callback channel closed".into())),
            },
            _ = tokio::time::sleep(ttl) => Err(FlowError::Timeout(ttl)),
            _ = cancel.cancelled() => Err(FlowError::Cancelled),
        }
    }

    /// Stop accepting connections. Best effort: a server that does not
    /// drain within the grace period is aborted.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await.is_err() {
            self.task.abort();
            warn!(addr = %self.addr, "callback server did not drain, aborted");
        } else {
            debug!(addr = %self.addr, "callback server stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> (CallbackState, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (
            CallbackState {
                expected_state: Arc::from("expected-state"),
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    async fn call(state: &CallbackState, method: &str, uri: &str) -> (StatusCode, String) {
        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn valid_callback_delivers_code() {
        let (state, rx) = test_state();
        let (status, body) = call(&state, "GET", "/callback?state=expected-state&code=abc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, SUCCESS_MESSAGE);
        assert_eq!(rx.await.unwrap(), Ok("abc".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_requests_are_cut_off() {
        let app = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "done"
            }),
        );
        let response = with_request_timeout(app, Duration::from_secs(1))
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn non_get_is_rejected_without_resolving() {
        let (state, mut rx) = test_state();
        let (status, _) = call(&state, "POST", "/callback?state=expected-state&code=abc").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert!(rx.try_recv().is_err(), "405 must not resolve the attempt");
    }

    #[tokio::test]
    async fn state_mismatch_is_400_and_resolves_with_error() {
        let (state, rx) = test_state();
        let (status, body) = call(&state, "GET", "/callback?state=forged&code=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid state");
        assert_eq!(rx.await.unwrap(), Err(FlowError::InvalidState));
    }

    #[tokio::test]
    async fn missing_code_is_400_and_resolves_with_error() {
        let (state, rx) = test_state();
        let (status, body) = call(&state, "GET", "/callback?state=expected-state").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "No code");
        assert_eq!(rx.await.unwrap(), Err(FlowError::MissingCode));
    }

    #[tokio::test]
    async fn authorization_error_is_surfaced() {
        let (state, rx) = test_state();
        let (status, _) = call(
            &state,
            "GET",
            "/callback?state=expected-state&error=access_denied&error_description=nope",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            rx.await.unwrap(),
            Err(FlowError::Denied("access_denied: nope".into()))
        );
    }

    #[tokio::test]
    async fn first_event_wins_and_later_code_is_rejected() {
        let (state, rx) = test_state();
        let (first, _) = call(&state, "GET", "/callback?state=forged&code=abc").await;
        let (second, _) = call(&state, "GET", "/callback?state=expected-state&code=abc").await;
        assert_eq!(first, StatusCode::BAD_REQUEST);
        assert_eq!(second, StatusCode::CONFLICT);
        assert_eq!(rx.await.unwrap(), Err(FlowError::InvalidState));
    }

    #[tokio::test]
    async fn wait_times_out_after_ttl() {
        let mut server = CallbackServer::start("127.0.0.1", 0, "s").await.unwrap();
        let err = server
            .wait(Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, FlowError::Timeout(Duration::from_millis(50)));
        assert_eq!(err.to_string(), "no callback received within 50ms");
        server.shutdown().await;
    }

    #[tokio::test]
    async fn wait_returns_cancelled() {
        let mut server = CallbackServer::start("127.0.0.1", 0, "s").await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = server.wait(Duration::from_secs(30), &cancel).await.unwrap_err();
        assert_eq!(err, FlowError::Cancelled);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn live_server_receives_redirect_and_stops() {
        let mut server = CallbackServer::start("127.0.0.1", 0, "live-state").await.unwrap();
        let addr = server.local_addr();

        let browser = tokio::spawn(async move {
            reqwest::get(format!("http://{addr}/callback?state=live-state&code=xyz"))
                .await
                .unwrap()
                .status()
        });

        let code = server
            .wait(Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, "xyz");
        assert_eq!(browser.await.unwrap(), reqwest::StatusCode::OK);

        server.shutdown().await;
        assert!(
            tokio::net::TcpStream::connect(addr).await.is_err(),
            "listener must be closed after shutdown"
        );
    }
}
