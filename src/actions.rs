use std::fmt::Display;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{dispatch::DispatchResult, reconnect::LinkState, session::SessionId};

/// Turn a request or response into json.
pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// Turn a request or response into indented json.
pub fn to_json_pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// Enable or disable manual control.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetManualControl {
    /// Whether manual movement commands should reach the controller.
    #[serde(alias = "durum")]
    pub enabled: bool,
}

impl SetManualControl {
    /// An example of enabling manual control.
    pub fn example() -> Self {
        Self { enabled: true }
    }
}

/// The state of manual control after a change.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManualControl {
    /// Whether manual movement commands reach the controller.
    pub manual_control: bool,
}

/// Send a command to the controller.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendCommand {
    /// The command token.
    #[serde(alias = "komut")]
    pub command: String,
}

impl SendCommand {
    /// An example of a manual movement command.
    pub fn example() -> Self {
        Self {
            command: "MANUEL_ILERI".into(),
        }
    }
}

/// What happened to a command.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOutcome {
    /// The command, as put on the wire if it was.
    pub command: String,

    /// What happened.
    pub result: DispatchResult,
}

impl CommandOutcome {
    /// An example of a command that was blocked.
    pub fn example() -> Self {
        Self {
            command: "MANUEL_ILERI".into(),
            result: DispatchResult::Blocked,
        }
    }
}

impl Display for CommandOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.command, self.result)
    }
}

/// The latest barcode.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Barcode {
    /// The reading, empty if nothing was scanned yet.
    pub barcode: String,

    /// When it was scanned.
    pub captured_at: Option<DateTime<Utc>>,

    /// Whether it was passed on to the controller.
    pub relayed: bool,
}

impl Barcode {
    /// An example of a barcode which was passed on.
    pub fn example() -> Self {
        Self {
            barcode: "ABC12".into(),
            captured_at: Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).single(),
            relayed: true,
        }
    }
}

/// The latest barcode, the way the bundled control page polls for it.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageBarcode {
    /// The reading, empty if nothing was scanned yet.
    pub barkod: String,
}

impl From<Barcode> for PageBarcode {
    fn from(barcode: Barcode) -> Self {
        Self {
            barkod: barcode.barcode,
        }
    }
}

/// A new control session started.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStarted {
    /// Its id.
    pub session: SessionId,
}

/// How the gateway is doing.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Status {
    /// The controller link.
    pub controller: LinkState,

    /// The scanner link.
    pub scanner: LinkState,

    /// Whether manual movement commands reach the controller.
    pub manual_control: bool,
}
