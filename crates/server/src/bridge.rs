//! Long-poll job queue between this process and the in-page shim.
//!
//! The shim polls for [`BridgeJob`]s, performs them against the page, and
//! posts a [`BridgeReply`]. [`BridgeHost`] turns that round trip into the
//! [`HostPage`] interface.

use crate::host::HostPage;
use anyhow::bail;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use wplacer_protocol::{
    BridgeJob, BridgeReply, Control, ControlState, HostAction, HostReply, UserSnapshot,
};

pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);
pub const POLL_TIMEOUT: Duration = Duration::from_secs(25);

pub struct Bridge {
    next_id: AtomicU64,
    jobs_tx: mpsc::UnboundedSender<BridgeJob>,
    jobs_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BridgeJob>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<HostReply>>>,
    reply_timeout: Duration,
}

impl Bridge {
    pub fn new(reply_timeout: Duration) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        Self {
            next_id: AtomicU64::new(1),
            jobs_tx,
            jobs_rx: tokio::sync::Mutex::new(jobs_rx),
            pending: Mutex::new(HashMap::new()),
            reply_timeout,
        }
    }

    /// Queue `action` for the shim and wait for its reply. `None` on timeout.
    pub async fn request(&self, action: HostAction) -> Option<HostReply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending_map().insert(id, tx);
        if self.jobs_tx.send(BridgeJob { id, action }).is_err() {
            self.pending_map().remove(&id);
            return None;
        }

        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(reply)) => Some(reply),
            _ => {
                self.pending_map().remove(&id);
                log::debug!("bridge job {id} got no reply");
                None
            }
        }
    }

    /// Next job still awaiting a reply, waiting up to `wait` for one.
    pub async fn poll(&self, wait: Duration) -> Option<BridgeJob> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut rx = self.jobs_rx.lock().await;
        loop {
            let job = tokio::time::timeout_at(deadline, rx.recv()).await.ok()??;
            if self.pending_map().contains_key(&job.id) {
                return Some(job);
            }
        }
    }

    /// Complete a pending job. False when the id is unknown or expired.
    pub fn reply(&self, reply: BridgeReply) -> bool {
        match self.pending_map().remove(&reply.id) {
            Some(tx) => tx.send(reply.reply).is_ok(),
            None => false,
        }
    }

    fn pending_map(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<HostReply>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(REPLY_TIMEOUT)
    }
}

#[derive(Clone)]
pub struct BridgeHost {
    bridge: Arc<Bridge>,
}

impl BridgeHost {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }

    async fn perform(&self, action: HostAction) -> anyhow::Result<()> {
        let label = format!("{action:?}");
        match self.bridge.request(action).await {
            Some(HostReply::Done) => Ok(()),
            Some(HostReply::Failed { message }) => bail!("{label}: {message}"),
            Some(other) => bail!("{label}: unexpected reply {other:?}"),
            None => bail!("{label}: page did not answer"),
        }
    }
}

impl HostPage for BridgeHost {
    async fn control_state(&self, control: Control) -> ControlState {
        match self.bridge.request(HostAction::ControlState { control }).await {
            Some(HostReply::Control { state }) => state,
            _ => ControlState::Missing,
        }
    }

    async fn click(&self, control: Control) -> anyhow::Result<()> {
        self.perform(HostAction::Click { control }).await
    }

    async fn tap_canvas_center(&self) -> anyhow::Result<()> {
        self.perform(HostAction::TapCanvasCenter).await
    }

    async fn close_paint_menu(&self) -> anyhow::Result<()> {
        self.perform(HostAction::ClosePaintMenu).await
    }

    async fn refresh_user(&self) -> Option<UserSnapshot> {
        match self.bridge.request(HostAction::RefreshUser).await {
            Some(HostReply::User { user }) => user,
            _ => None,
        }
    }
}
