use std::time::Duration;

/// Why one chunk batch could not be placed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaceError {
    #[error("paint button never became available")]
    PaintUiUnavailable,
    #[error("paint confirm button never became available")]
    ConfirmUiUnavailable,
    #[error("no security token on the intercepted paint request")]
    NoSecurityToken,
    #[error("malformed paint request: {0}")]
    MalformedRequest(String),
    #[error("a paint request interception is already armed")]
    InterceptorBusy,
    #[error("no paint request seen within {0:?}")]
    InterceptTimeout(Duration),
    #[error("paint request rejected as unauthorized ({0})")]
    Unauthorized(u16),
    #[error("paint request failed with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("host page action failed: {0}")]
    Host(String),
    #[error("network error: {0}")]
    Transport(String),
}
