pub mod autofill;
pub mod bridge;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod host;
pub mod intercept;
pub mod placer;
pub mod status;
pub mod transport;
pub mod wait;

use anyhow::Context;
use autofill::{AutoFill, AutoFillTimings};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bridge::{Bridge, BridgeHost, POLL_TIMEOUT};
use config::Config;
use fetcher::{ChunkSource, HttpChunkFetcher};
use intercept::Dispatch;
use status::StatusBoard;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};
use transport::{ReqwestTransport, Transport};
use wplacer_engine::Template;
use wplacer_protocol::{BridgeReply, HttpRequest, Settings, SettingsPatch, StatusReport};

pub use error::PlaceError;

pub struct AppState<T, C> {
    pub autofill: AutoFill<BridgeHost, T, C>,
    pub bridge: Arc<Bridge>,
    pub dispatch: Arc<Dispatch<T>>,
    pub board: Arc<StatusBoard>,
    pub settings: watch::Sender<Settings>,
    pub poll_timeout: Duration,
}

impl<T: Transport, C: ChunkSource> AppState<T, C> {
    pub fn new(network: T, chunks: C, settings: Settings, timings: AutoFillTimings) -> Self {
        let bridge = Arc::new(Bridge::default());
        let dispatch = Arc::new(Dispatch::new(network));
        let board = Arc::new(StatusBoard::default());
        let (settings, settings_rx) = watch::channel(settings);
        let autofill = AutoFill::new(
            Arc::new(BridgeHost::new(Arc::clone(&bridge))),
            Arc::clone(&dispatch),
            Arc::new(chunks),
            settings_rx,
            board.clone(),
            timings,
        );
        Self {
            autofill,
            bridge,
            dispatch,
            board,
            settings,
            poll_timeout: POLL_TIMEOUT,
        }
    }

    pub fn report(&self) -> StatusReport {
        let (remaining, eta_ms) = self.board.progress_snapshot();
        StatusReport {
            state: self.autofill.state(),
            running: self.autofill.is_running(),
            protecting: self.autofill.is_protecting(),
            remaining,
            eta_ms,
            log: self.board.lines(),
        }
    }
}

type Shared<T, C> = State<Arc<AppState<T, C>>>;

pub fn build_router<T: Transport, C: ChunkSource>(state: AppState<T, C>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/bridge/poll", get(bridge_poll::<T, C>))
        .route("/api/bridge/reply", post(bridge_reply::<T, C>))
        .route("/api/bridge/fetch", post(bridge_fetch::<T, C>))
        .route("/api/autofill/toggle", post(autofill_toggle::<T, C>))
        .route("/api/status", get(status_report::<T, C>))
        .route(
            "/api/settings",
            get(settings_get::<T, C>).put(settings_put::<T, C>),
        )
        .with_state(Arc::new(state))
        // Only the local browser may drive the page.
        .layer(middleware::from_fn(ip_allowlist))
        // Never `Access-Control-Allow-Origin: *`: any site open in the browser
        // could otherwise drive the page through this process.
        .layer(local_only_cors())
}

async fn health() -> &'static str {
    "ok"
}

async fn bridge_poll<T: Transport, C: ChunkSource>(
    State(state): Shared<T, C>,
) -> axum::response::Response {
    match state.bridge.poll(state.poll_timeout).await {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn bridge_reply<T: Transport, C: ChunkSource>(
    State(state): Shared<T, C>,
    Json(reply): Json<BridgeReply>,
) -> StatusCode {
    if state.bridge.reply(reply) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn bridge_fetch<T: Transport, C: ChunkSource>(
    State(state): Shared<T, C>,
    Json(req): Json<HttpRequest>,
) -> axum::response::Response {
    match state.dispatch.send(req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => {
            log::warn!("page request failed: {e:#}");
            (StatusCode::BAD_GATEWAY, format!("{e:#}")).into_response()
        }
    }
}

async fn autofill_toggle<T: Transport, C: ChunkSource>(
    State(state): Shared<T, C>,
) -> Json<StatusReport> {
    state.autofill.toggle().await;
    Json(state.report())
}

async fn status_report<T: Transport, C: ChunkSource>(
    State(state): Shared<T, C>,
) -> Json<StatusReport> {
    Json(state.report())
}

async fn settings_get<T: Transport, C: ChunkSource>(State(state): Shared<T, C>) -> Json<Settings> {
    Json(state.settings.borrow().clone())
}

async fn settings_put<T: Transport, C: ChunkSource>(
    State(state): Shared<T, C>,
    Json(patch): Json<SettingsPatch>,
) -> Json<Settings> {
    state.settings.send_modify(|s| s.apply(&patch));
    let settings = state.settings.borrow().clone();
    log::info!(
        "settings updated: limit {}, mode {:?}, protect {}",
        settings.charge_limit,
        settings.mode,
        settings.protect
    );
    Json(settings)
}

pub async fn serve(config: Config, template: Option<Template>, autostart: bool) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("bind {}", config.listen))?;
    serve_listener(listener, config, template, autostart, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("ctrl-c handler unavailable: {e}");
            std::future::pending::<()>().await
        }
        log::info!("shutting down");
    })
    .await?;
    Ok(())
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    config: Config,
    template: Option<Template>,
    autostart: bool,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<SocketAddr> {
    let network = ReqwestTransport::new(config.cookie.clone())?;
    let chunks = HttpChunkFetcher::new(network.client().clone(), config.backend_url.clone());
    let state = AppState::new(network, chunks, config.settings, AutoFillTimings::default());
    state.autofill.set_template(template);
    if autostart {
        state.autofill.start();
    }

    let app = build_router(state);
    let addr = listener.local_addr()?;
    log::info!("listening on http://{addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(addr)
}

async fn ip_allowlist(
    axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<SocketAddr>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let ip = peer.ip();
    if is_allowed_peer_ip(ip) {
        return next.run(req).await;
    }
    log::warn!("rejected request from {ip}");
    (StatusCode::FORBIDDEN, "forbidden").into_response()
}

fn is_allowed_peer_ip(ip: IpAddr) -> bool {
    ip.is_loopback()
}

fn local_only_cors() -> CorsLayer {
    use axum::http::header;
    use axum::http::HeaderValue;
    use axum::http::Method;

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _req| {
            is_allowed_local_origin(origin)
        }))
}

fn is_allowed_local_origin(origin: &axum::http::HeaderValue) -> bool {
    let Ok(s) = origin.to_str() else {
        return false;
    };

    // The page the shim runs in.
    if s == "https://wplace.live" {
        return true;
    }

    is_http_origin_for_host(s, "localhost") || is_http_origin_for_host(s, "127.0.0.1")
}

fn is_http_origin_for_host(origin: &str, host: &str) -> bool {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = origin.strip_prefix(scheme) {
            if let Some(after) = rest.strip_prefix(host) {
                // scheme://host[:port] only
                return after.is_empty() || after.starts_with(':');
            }
        }
    }
    false
}
