use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use crate::bridge::Bridge;
use crate::error::{BridgeError, Result};
use crate::llm::LanguageModel;

/// HTTP front end: `POST /query` runs one orchestrated query.
pub struct BridgeServer<M: LanguageModel + 'static> {
    bridge: Arc<Bridge<M>>,
    allowed_origins: Arc<Vec<String>>,
}

impl<M: LanguageModel + 'static> Clone for BridgeServer<M> {
    fn clone(&self) -> Self {
        Self {
            bridge: Arc::clone(&self.bridge),
            allowed_origins: Arc::clone(&self.allowed_origins),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub server_script: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: String,
}

impl<M: LanguageModel + 'static> BridgeServer<M> {
    pub fn new(bridge: Arc<Bridge<M>>, allowed_origins: Vec<String>) -> Self {
        Self {
            bridge,
            allowed_origins: Arc::new(allowed_origins),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(welcome))
            .route("/health", get(|| async { "ok" }))
            .route("/query", post(handle_query::<M>))
            .with_state(Arc::clone(&self.bridge))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.allowed_origins),
                cors,
            ))
    }

    /// Serve until Ctrl-C, then close every tool server session.
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(addr = ?listener.local_addr().ok(), "HTTP server listening");
        let served = axum::serve(listener, self.router().into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|err| BridgeError::Transport(format!("server error: {err}")));
        self.bridge.shutdown().await;
        served
    }
}

async fn welcome() -> impl IntoResponse {
    Json(json!({
        "message": "Welcome to the MCP bridge API. Use the /query endpoint to submit queries."
    }))
}

async fn handle_query<M: LanguageModel + 'static>(
    State(bridge): State<Arc<Bridge<M>>>,
    Json(req): Json<QueryRequest>,
) -> Response {
    match bridge.handle_query(&req.query, &req.server_script).await {
        Ok(response) => Json(QueryResponse { response }).into_response(),
        Err(err) => {
            let mut body = json!({ "detail": err.to_string() });
            if let Some(partial) = err.partial_output() {
                body["partial"] = json!(partial);
            }
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

async fn cors(State(origins): State<Arc<Vec<String>>>, request: Request, next: Next) -> Response {
    let allowed = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .filter(|origin| origins.iter().any(|allowed| allowed == "*" || allowed == origin))
        .and_then(|origin| HeaderValue::from_str(origin).ok());
    let requested_headers = request
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned();

    let mut response = if request.method() == Method::OPTIONS && allowed.is_some() {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    if let Some(origin) = allowed {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            requested_headers.unwrap_or_else(|| HeaderValue::from_static("content-type")),
        );
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }
    response
}
