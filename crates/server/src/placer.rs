//! Places one chunk batch at a time.
//!
//! The first batch of a session goes through the page: open the paint menu,
//! tap the canvas, arm the interceptor and press confirm, so the page issues a
//! genuine paint request that gets rewritten in flight. The captured request
//! is then reused for later batches until it goes stale.

use crate::error::PlaceError;
use crate::host::HostPage;
use crate::intercept::{splice_batch, Dispatch};
use crate::status::Reporter;
use crate::transport::Transport;
use crate::wait::wait_until;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use wplacer_engine::ChunkBatch;
use wplacer_protocol::{Control, ControlState, HttpRequest, HttpResponse};

#[derive(Debug, Clone, Copy)]
pub struct PlacerTimings {
    pub poll_interval: Duration,
    pub poll_attempts: u32,
    pub intercept_timeout: Duration,
    pub context_ttl: Duration,
    pub rate_limit_backoff: Duration,
}

impl Default for PlacerTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            poll_attempts: 20,
            intercept_timeout: Duration::from_secs(15),
            context_ttl: Duration::from_secs(10),
            rate_limit_backoff: Duration::from_secs(30),
        }
    }
}

/// A paint request harvested from the page.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub token: String,
    pub request: HttpRequest,
    pub url: String,
    pub captured_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacePath {
    /// Reuse the cached request context.
    Fast,
    /// Drive the page UI and intercept its request.
    Slow,
}

pub struct PixelPlacer<H, T> {
    host: Arc<H>,
    dispatch: Arc<Dispatch<T>>,
    reporter: Arc<dyn Reporter>,
    timings: PlacerTimings,
    cached: Option<RequestContext>,
}

impl<H: HostPage, T: Transport> PixelPlacer<H, T> {
    pub fn new(
        host: Arc<H>,
        dispatch: Arc<Dispatch<T>>,
        reporter: Arc<dyn Reporter>,
        timings: PlacerTimings,
    ) -> Self {
        Self {
            host,
            dispatch,
            reporter,
            timings,
            cached: None,
        }
    }

    pub fn cached_context(&self) -> Option<&RequestContext> {
        self.cached.as_ref()
    }

    pub fn clear_context(&mut self) {
        self.cached = None;
    }

    fn context_is_fresh(&self) -> bool {
        self.cached
            .as_ref()
            .is_some_and(|ctx| ctx.captured_at.elapsed() < self.timings.context_ttl)
    }

    /// Place `batch`, retrying on 429 and falling back to the page on 401/403.
    pub async fn place(&mut self, batch: &ChunkBatch) -> Result<HttpResponse, PlaceError> {
        let mut path = if self.context_is_fresh() {
            PlacePath::Fast
        } else {
            PlacePath::Slow
        };
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let response = match path {
                PlacePath::Fast => match self.send_cached(batch).await? {
                    Some(resp) => resp,
                    None => {
                        path = PlacePath::Slow;
                        continue;
                    }
                },
                PlacePath::Slow => self.send_via_page(batch).await?,
            };

            match response.status {
                200..=299 => return Ok(response),
                401 | 403 => {
                    self.cached = None;
                    if path == PlacePath::Fast {
                        log::info!(
                            "cached paint token rejected ({}), re-harvesting from page",
                            response.status
                        );
                        path = PlacePath::Slow;
                        continue;
                    }
                    return Err(PlaceError::Unauthorized(response.status));
                }
                429 => {
                    let msg = format!(
                        "rate limited on chunk {},{} (attempt {attempt}), retrying in {}s",
                        batch.chunk_x,
                        batch.chunk_y,
                        self.timings.rate_limit_backoff.as_secs()
                    );
                    log::warn!("{msg}");
                    self.reporter.output(&msg);
                    tokio::time::sleep(self.timings.rate_limit_backoff).await;
                }
                status => {
                    return Err(PlaceError::Rejected {
                        status,
                        body: response.body,
                    })
                }
            }
        }
    }

    /// `Ok(None)` when there is no context to reuse.
    async fn send_cached(&self, batch: &ChunkBatch) -> Result<Option<HttpResponse>, PlaceError> {
        let Some(ctx) = &self.cached else {
            return Ok(None);
        };
        let (_, request) = splice_batch(&ctx.request, batch)?;
        log::debug!("fast path: {} pixels to {}", batch.len(), request.url);
        self.dispatch
            .network()
            .send(request)
            .await
            .map(Some)
            .map_err(|e| PlaceError::Transport(format!("{e:#}")))
    }

    async fn send_via_page(&mut self, batch: &ChunkBatch) -> Result<HttpResponse, PlaceError> {
        self.open_paint_menu().await?;

        let mut armed = self.dispatch.arm(batch.clone())?;
        self.host
            .tap_canvas_center()
            .await
            .map_err(|e| PlaceError::Host(format!("{e:#}")))?;
        self.wait_ready(Control::ConfirmButton)
            .await
            .map_err(|_| PlaceError::ConfirmUiUnavailable)?;
        self.host
            .click(Control::ConfirmButton)
            .await
            .map_err(|e| PlaceError::Host(format!("{e:#}")))?;

        let capture = armed.capture(self.timings.intercept_timeout).await?;
        drop(armed);

        if capture.response.is_success() {
            self.cached = Some(RequestContext {
                token: capture.token,
                url: capture.request.url.clone(),
                request: capture.request,
                captured_at: Instant::now(),
            });
        }
        Ok(capture.response)
    }

    /// Make sure the paint menu is open, opening it if needed.
    async fn open_paint_menu(&self) -> Result<(), PlaceError> {
        if self.host.control_state(Control::ConfirmButton).await == ControlState::Ready {
            return Ok(());
        }
        self.wait_ready(Control::PaintButton)
            .await
            .map_err(|_| PlaceError::PaintUiUnavailable)?;
        self.host
            .click(Control::PaintButton)
            .await
            .map_err(|e| PlaceError::Host(format!("{e:#}")))
    }

    async fn wait_ready(&self, control: Control) -> Result<u32, crate::wait::NotReady> {
        let host = &self.host;
        wait_until(
            || async move { host.control_state(control).await == ControlState::Ready },
            self.timings.poll_interval,
            self.timings.poll_attempts,
        )
        .await
    }
}
