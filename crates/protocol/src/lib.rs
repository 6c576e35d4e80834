use serde::{Deserialize, Serialize};

/// Pixel selection order used when scheduling a fill pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    /// Boundary first, then row-major order. Deterministic and exhaustive.
    Scan,
    /// Boundary first, each group shuffled.
    Random,
}

impl Default for FillMode {
    fn default() -> Self {
        Self::Scan
    }
}

/// Charge economy snapshot as reported by the backend `/me` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChargeSnapshot {
    pub count: f64,
    pub max: u32,
    #[serde(rename = "cooldownMs")]
    pub recharge_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charges: Option<ChargeSnapshot>,
    #[serde(rename = "extraColorsBitmap", default)]
    pub extra_colors_bitmap: i64,
}

/// JSON body of a pixel placement POST.
///
/// Unknown fields captured from a host-issued request are carried through
/// untouched so a rewritten body stays byte-compatible with what the page sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaintBody {
    #[serde(default)]
    pub colors: Vec<u8>,
    #[serde(default)]
    pub coords: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// User-adjustable knobs. Hot-reloadable: consumers re-read on every decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub charge_limit: u32,
    pub protection_delay_units: u32,
    pub mode: FillMode,
    pub protect: bool,
    pub templates_should_be_drawn: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            charge_limit: 30,
            protection_delay_units: 0,
            mode: FillMode::Scan,
            protect: false,
            templates_should_be_drawn: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protection_delay_units: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<FillMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protect: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_should_be_drawn: Option<bool>,
}

impl Settings {
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.charge_limit {
            self.charge_limit = v.max(1);
        }
        if let Some(v) = patch.protection_delay_units {
            self.protection_delay_units = v;
        }
        if let Some(v) = patch.mode {
            self.mode = v;
        }
        if let Some(v) = patch.protect {
            self.protect = v;
        }
        if let Some(v) = patch.templates_should_be_drawn {
            self.templates_should_be_drawn = v;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillState {
    Idle,
    Filling,
    WaitingCharges,
    Protecting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub ts: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: FillState,
    pub running: bool,
    pub protecting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_ms: Option<u64>,
    pub log: Vec<LogLine>,
}

/// Host page controls the placer needs to interact with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    /// The "Paint" button that opens the paint menu.
    PaintButton,
    /// The button inside the open paint menu that submits the placement.
    ConfirmButton,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    Missing,
    Disabled,
    Ready,
}

/// Work item handed to the in-page shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostAction {
    ControlState { control: Control },
    Click { control: Control },
    TapCanvasCenter,
    ClosePaintMenu,
    RefreshUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostReply {
    Control { state: ControlState },
    Done,
    User {
        #[serde(default)]
        user: Option<UserSnapshot>,
    },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeJob {
    pub id: u64,
    pub action: HostAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeReply {
    pub id: u64,
    pub reply: HostReply,
}

/// A page request in transport-neutral form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub mod paths {
    /// Substring identifying pixel placement POSTs.
    pub const PIXEL: &str = "/s0/pixel/";
    pub const TILES: &str = "/files/s0/tiles/";

    pub fn pixel_url(base: &str, chunk_x: i32, chunk_y: i32) -> String {
        format!("{}{PIXEL}{chunk_x}/{chunk_y}", base.trim_end_matches('/'))
    }

    pub fn tile_url(base: &str, chunk_x: i32, chunk_y: i32) -> String {
        format!("{}{TILES}{chunk_x}/{chunk_y}.png", base.trim_end_matches('/'))
    }
}
