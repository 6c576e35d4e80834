//! Central dispatch point for page traffic, with a one-shot paint interceptor.
//!
//! Every request the page issues goes through [`Dispatch::send`]. While a hook
//! is armed, the first POST to the pixel placement path is captured, its
//! security token harvested, its body and URL rewritten for the scheduled
//! batch, and the rewritten request forwarded on the plain network path. The
//! hook is removed the moment it fires, or when the [`Armed`] guard drops.

use crate::error::PlaceError;
use crate::transport::Transport;
use regex::{NoExpand, Regex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::sync::oneshot;
use wplacer_engine::ChunkBatch;
use wplacer_protocol::{paths, HttpRequest, HttpResponse, PaintBody};

/// What a fired hook hands back to whoever armed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub token: String,
    /// The rewritten request as it was sent.
    pub request: HttpRequest,
    pub response: HttpResponse,
}

struct Hook {
    id: u64,
    batch: ChunkBatch,
    tx: oneshot::Sender<Result<Capture, PlaceError>>,
}

pub struct Dispatch<T> {
    network: T,
    hook: Mutex<Option<Hook>>,
    next_id: AtomicU64,
}

impl<T: Transport> Dispatch<T> {
    pub fn new(network: T) -> Self {
        Self {
            network,
            hook: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// The original network path, bypassing any hook.
    pub fn network(&self) -> &T {
        &self.network
    }

    pub fn is_armed(&self) -> bool {
        self.slot().is_some()
    }

    /// Arm the interceptor for `batch`. Only one hook may be armed at a time.
    pub fn arm(&self, batch: ChunkBatch) -> Result<Armed<'_, T>, PlaceError> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(PlaceError::InterceptorBusy);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        *slot = Some(Hook { id, batch, tx });
        Ok(Armed {
            dispatch: self,
            id,
            rx,
        })
    }

    pub async fn send(&self, req: HttpRequest) -> anyhow::Result<HttpResponse> {
        let Some(hook) = self.take_matching(&req) else {
            return self.network.send(req).await;
        };
        log::debug!("intercepted paint request to {}", req.url);

        let (token, rewritten) = match splice_batch(&req, &hook.batch) {
            Ok(v) => v,
            Err(e) => {
                let _ = hook.tx.send(Err(e.clone()));
                return Err(e.into());
            }
        };

        match self.network.send(rewritten.clone()).await {
            Ok(response) => {
                let _ = hook.tx.send(Ok(Capture {
                    token,
                    request: rewritten,
                    response: response.clone(),
                }));
                Ok(response)
            }
            Err(e) => {
                let _ = hook.tx.send(Err(PlaceError::Transport(format!("{e:#}"))));
                Err(e)
            }
        }
    }

    fn take_matching(&self, req: &HttpRequest) -> Option<Hook> {
        if !req.is_post() || !req.url.contains(paths::PIXEL) {
            return None;
        }
        self.slot().take()
    }

    fn disarm(&self, id: u64) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|h| h.id == id) {
            *slot = None;
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Hook>> {
        self.hook.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An armed hook. Dropping it disarms the hook if it has not fired.
pub struct Armed<'a, T: Transport> {
    dispatch: &'a Dispatch<T>,
    id: u64,
    rx: oneshot::Receiver<Result<Capture, PlaceError>>,
}

impl<T: Transport> Armed<'_, T> {
    pub async fn capture(&mut self, within: Duration) -> Result<Capture, PlaceError> {
        match tokio::time::timeout(within, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PlaceError::Transport("interceptor dropped".to_string())),
            Err(_) => Err(PlaceError::InterceptTimeout(within)),
        }
    }
}

impl<T: Transport> Drop for Armed<'_, T> {
    fn drop(&mut self) {
        self.dispatch.disarm(self.id);
    }
}

fn pixel_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/s0/pixel/-?\d+/-?\d+").expect("pixel path pattern"))
}

/// Rewrite a paint request to carry `batch`, keeping its token and every other
/// field. Returns the token alongside the new request.
pub fn splice_batch(
    req: &HttpRequest,
    batch: &ChunkBatch,
) -> Result<(String, HttpRequest), PlaceError> {
    let raw = req.body.as_deref().ok_or(PlaceError::NoSecurityToken)?;
    let mut body: PaintBody =
        serde_json::from_str(raw).map_err(|e| PlaceError::MalformedRequest(e.to_string()))?;
    let token = match body.t.as_deref() {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => return Err(PlaceError::NoSecurityToken),
    };

    if !pixel_path().is_match(&req.url) {
        return Err(PlaceError::MalformedRequest(format!(
            "unexpected paint url {}",
            req.url
        )));
    }
    let target = format!("{}{}/{}", paths::PIXEL, batch.chunk_x, batch.chunk_y);
    let url = pixel_path().replace(&req.url, NoExpand(&target)).into_owned();

    body.colors = batch.colors();
    body.coords = batch.coords();
    let body = serde_json::to_string(&body)
        .map_err(|e| PlaceError::MalformedRequest(e.to_string()))?;

    let mut out = req.clone();
    out.url = url;
    out.body = Some(body);
    Ok((token, out))
}
