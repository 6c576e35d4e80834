use std::future::Future;
use wplacer_protocol::{Control, ControlState, UserSnapshot};

/// The page this process drives: its paint controls, its canvas, and the
/// user/charge data it already holds.
pub trait HostPage: Send + Sync + 'static {
    fn control_state(&self, control: Control) -> impl Future<Output = ControlState> + Send;

    fn click(&self, control: Control) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Pointer-down, click, pointer-up at the visual centre of the canvas.
    fn tap_canvas_center(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn close_paint_menu(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn refresh_user(&self) -> impl Future<Output = Option<UserSnapshot>> + Send;
}
