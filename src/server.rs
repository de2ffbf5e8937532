//! HTTP host that routes every request through a [`ServiceWorker`].
//!
//! Requests the worker handles are answered from its cache or via its
//! strategies. Declined `GET`/`HEAD` requests are passed straight through to
//! the origin without caching. Two control routes live under
//! `/__shellcache/`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use crate::error::Error;
use crate::fetch::{Fetcher, Request};
use crate::manager::{CacheStatus, Resolution};
use crate::response::Response;
use crate::stats::ResolveSnapshot;
use crate::store::CacheStorage;
use crate::worker::{Command, Lifecycle, ServiceWorker, WorkerState};

/// A worker shared between request handlers.
pub type SharedWorker<S, F> = Arc<RwLock<ServiceWorker<S, F>>>;

struct AppState<S: CacheStorage, F: Fetcher> {
    worker: SharedWorker<S, F>,
}

impl<S: CacheStorage, F: Fetcher> Clone for AppState<S, F> {
    fn clone(&self) -> Self {
        Self {
            worker: Arc::clone(&self.worker),
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    state: WorkerState,
    cache: CacheStatus,
    resolve: ResolveSnapshot,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: &Error) -> axum::response::Response {
    (
        status,
        axum::Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn into_http(response: Response) -> axum::response::Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut http = (status, response.body).into_response();
    if let Some(value) = response
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        http.headers_mut().insert(CONTENT_TYPE, value);
    }
    http
}

async fn intercept<S, F>(State(state): State<AppState<S, F>>, method: Method, uri: Uri) -> axum::response::Response
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    let worker = state.worker.read().await;
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = format!("{}{path}", worker.manager().origin());
    let request = Request::new(method.as_str(), url);

    let result = match worker.fetch(&request).await {
        Ok(Resolution::Respond(response)) => Ok(response),
        Ok(Resolution::Declined) if method == Method::GET || method == Method::HEAD => {
            log::debug!("Passing through {} {}", request.method, request.url);
            worker.manager().fetcher().fetch(&request).await
        }
        Ok(Resolution::Declined) => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => into_http(response),
        Err(e) if e.is_network() => error_response(StatusCode::BAD_GATEWAY, &e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn post_message<S, F>(State(state): State<AppState<S, F>>, body: String) -> axum::response::Response
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    let command: Command = match body.parse() {
        Ok(command) => command,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    match state.worker.write().await.message(command).await {
        Ok(outcome) => axum::Json(outcome).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

async fn get_status<S, F>(State(state): State<AppState<S, F>>) -> axum::response::Response
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    let worker = state.worker.read().await;
    match worker.manager().status().await {
        Ok(cache) => axum::Json(StatusResponse {
            state: worker.state(),
            cache,
            resolve: worker.manager().stats().snapshot(),
        })
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

/// Builds the router for a worker.
pub fn router<S, F>(worker: SharedWorker<S, F>) -> Router
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let control = Router::new()
        .route("/__shellcache/message", post(post_message::<S, F>))
        .route("/__shellcache/status", get(get_status::<S, F>))
        .layer(cors);

    control
        .fallback(intercept::<S, F>)
        .with_state(AppState { worker })
}

/// Serves `worker` on `host:port` until the process exits.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn run_server<S, F>(worker: SharedWorker<S, F>, host: &str, port: u16) -> crate::Result<()>
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Serving on http://{}", listener.local_addr()?);
    axum::serve(listener, router(worker)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::manifest::Manifest;
    use crate::store::MemoryStorage;
    use crate::testing::{MockFetcher, origin};

    async fn spawn(skip_waiting: bool) -> (String, SharedWorker<MemoryStorage, MockFetcher>) {
        let manifest = Manifest::new().with("/", "r").with("index.html", "i").with("a.js", "a");
        let fetcher = MockFetcher::new();
        for key in manifest.keys() {
            fetcher.serve(
                &origin().resource_url(key),
                Response::ok(format!("body of {key}")).with_content_type("text/plain"),
            );
        }
        fetcher.serve(&origin().resource_url("undeclared.txt"), Response::ok("passthrough"));

        let config = CacheConfig::new()
            .with_origin(origin().as_str())
            .with_core_shell(["index.html"])
            .with_skip_waiting(skip_waiting);
        let mut worker = ServiceWorker::new(MemoryStorage::new(), fetcher, manifest, &config).unwrap();
        worker.install().await.unwrap();
        let worker = Arc::new(RwLock::new(worker));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::clone(&worker));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), worker)
    }

    async fn json(response: reqwest::Response) -> serde_json::Value {
        serde_json::from_str(&response.text().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn serves_declared_resources_with_content_type() {
        let (base, worker) = spawn(true).await;

        let response = reqwest::get(format!("{base}/a.js")).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(response.text().await.unwrap(), "body of a.js");

        // Second request is a cache hit.
        reqwest::get(format!("{base}/a.js")).await.unwrap();
        let snapshot = worker.read().await.manager().stats().snapshot();
        assert_eq!(snapshot.cache_hits, 1);
    }

    #[tokio::test]
    async fn declined_requests_pass_through_uncached() {
        let (base, worker) = spawn(true).await;

        let response = reqwest::get(format!("{base}/undeclared.txt")).await.unwrap();
        assert_eq!(response.text().await.unwrap(), "passthrough");

        let w = worker.read().await;
        assert_eq!(w.manager().stats().snapshot().declined, 1);
        let cached = w.manager().storage().keys("app-cache").await.unwrap();
        assert!(!cached.iter().any(|k| k.ends_with("undeclared.txt")));
    }

    #[tokio::test]
    async fn non_get_is_rejected() {
        let (base, _) = spawn(true).await;
        let response = reqwest::Client::new()
            .delete(format!("{base}/a.js"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED.as_u16());
    }

    #[tokio::test]
    async fn offline_root_falls_back_and_uncached_fails() {
        let (base, worker) = spawn(true).await;
        reqwest::get(format!("{base}/")).await.unwrap();
        worker.read().await.manager().fetcher().set_offline(true);

        let root = reqwest::get(format!("{base}/")).await.unwrap();
        assert_eq!(root.text().await.unwrap(), "body of /");

        let missing = reqwest::get(format!("{base}/a.js")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_GATEWAY.as_u16());
    }

    #[tokio::test]
    async fn message_route_drives_lifecycle() {
        let (base, worker) = spawn(false).await;
        let client = reqwest::Client::new();

        // Not activated yet: requests pass through, nothing is counted.
        reqwest::get(format!("{base}/a.js")).await.unwrap();
        assert_eq!(worker.read().await.state(), WorkerState::Installed);

        let activated = client
            .post(format!("{base}/__shellcache/message"))
            .body("skipWaiting")
            .send()
            .await
            .unwrap();
        let activated = json(activated).await;
        assert_eq!(activated["outcome"], "activated");
        assert_eq!(activated["first_install"], true);

        let synced = client
            .post(format!("{base}/__shellcache/message"))
            .body("downloadOffline")
            .send()
            .await
            .unwrap();
        let synced = json(synced).await;
        assert_eq!(synced["outcome"], "synced");
        assert_eq!(synced["fetched"], 2);

        let bad = client
            .post(format!("{base}/__shellcache/message"))
            .body("selfDestruct")
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST.as_u16());
    }

    #[tokio::test]
    async fn status_route_reports_cache() {
        let (base, _) = spawn(true).await;
        let status = json(reqwest::get(format!("{base}/__shellcache/status")).await.unwrap()).await;
        assert_eq!(status["state"], "activated");
        assert_eq!(status["cache"]["declared"], 3);
        assert_eq!(status["cache"]["cached"], 1);
    }
}
