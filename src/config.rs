use std::{path::Path, path::PathBuf, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    dispatch::{Movement, UnknownCommands},
    endpoint::EndpointId,
    error::Error,
    reconnect::ReconnectPolicy,
};

/// The port the control surface has always been served on.
pub const DEFAULT_PORT: u16 = 42421;

/// A serial device as described by a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// The path to the device.
    /// Likely "/dev/serial/by-id/..", "/dev/ttyACMx" or "COMx".
    pub id: EndpointId,

    /// Baud rate.
    pub baud: u32,

    /// Flow control, none unless stated.
    #[serde(default = "default_flow_control")]
    pub flow_control: serialport::FlowControl,

    /// How long the driver may block when opening the port.
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,

    /// How long to wait after opening before using the device.
    /// Some boards reset when the port is opened.
    #[serde(default)]
    pub settle_ms: u64,
}

fn default_flow_control() -> serialport::FlowControl {
    serialport::FlowControl::None
}

fn default_open_timeout_ms() -> u64 {
    1000
}

impl DeviceConfig {
    /// The vehicle controller.
    /// It resets when the port opens, so it gets two seconds to boot.
    pub fn controller(id: EndpointId) -> Self {
        Self {
            id,
            baud: 115_200,
            flow_control: default_flow_control(),
            open_timeout_ms: default_open_timeout_ms(),
            settle_ms: 2000,
        }
    }

    /// The barcode scanner.
    pub fn scanner(id: EndpointId) -> Self {
        Self {
            id,
            baud: 9600,
            flow_control: default_flow_control(),
            open_timeout_ms: default_open_timeout_ms(),
            settle_ms: 0,
        }
    }

    /// See [`DeviceConfig::settle_ms`].
    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Which commands the gateway knows about, and what to do with the rest.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    /// Commands other than manual movement which the controller understands.
    pub known: Vec<String>,

    /// What to do with commands which are neither movement nor known.
    pub unknown: UnknownCommands,
}

/// The configuration used for running the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// HTTP port.
    pub port: u16,

    /// The vehicle controller, which receives commands and barcodes.
    pub controller: DeviceConfig,

    /// The barcode scanner.
    pub scanner: DeviceConfig,

    /// How both devices are reconnected.
    pub reconnect: ReconnectPolicy,

    /// How long a write to the controller may take.
    pub write_timeout_ms: u64,

    /// Command vocabulary.
    pub commands: CommandConfig,

    /// A page to serve when a control session starts.
    pub index_page: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            controller: DeviceConfig::controller(EndpointId::tty(
                "/dev/serial/by-id/usb-Silicon_Labs_CP2102N_USB_to_UART_Bridge_Controller_04bbd5fec287ed119552970ca703910e-if00-port0",
            )),
            scanner: DeviceConfig::scanner(EndpointId::tty(
                "/dev/serial/by-id/usb-BF_SCAN_SCAN_CDC_A-00000-if00",
            )),
            reconnect: ReconnectPolicy::default(),
            write_timeout_ms: 1000,
            commands: CommandConfig::default(),
            index_page: None,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Not a valid configuration: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            controller: DeviceConfig::controller(EndpointId::tty("/dev/ttyUSB0")),
            scanner: DeviceConfig::scanner(EndpointId::tty("/dev/ttyACM0")),
            commands: CommandConfig {
                known: vec!["OTONOM_BASLAT".into(), "OTONOM_DURDUR".into()],
                unknown: UnknownCommands::Reject,
            },
            index_page: Some(PathBuf::from("templates/index.html")),
            ..Default::default()
        }
    }

    /// A configuration where both devices are mocks.
    pub fn mocked() -> Self {
        Self {
            controller: DeviceConfig::controller(EndpointId::mock("controller")),
            scanner: DeviceConfig::scanner(EndpointId::mock("scanner")),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap_or_else(|e| format!("Could not serialize configuration: {e}"))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let p = p.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::BadConfig(format!("Could not read {p:?}: {e}")))?;

        Self::deserialize(&s)
    }

    /// See [`Config::write_timeout_ms`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    fn check_devices(&self) -> Result<(), Error> {
        if self.controller.id == self.scanner.id {
            return Err(Error::BadConfig(format!(
                "The controller and the scanner can not be the same device: `{}`",
                self.controller.id
            )));
        }

        for (role, device) in [("controller", &self.controller), ("scanner", &self.scanner)] {
            if device.baud == 0 {
                return Err(Error::BadConfig(format!(
                    "The {role} needs a non-zero baud rate"
                )));
            }
        }

        if self.write_timeout_ms == 0 {
            return Err(Error::BadConfig(
                "The write timeout must be non-zero, or no write would ever succeed".into(),
            ));
        }

        Ok(())
    }

    fn check_known_commands(&self) -> Result<(), Error> {
        let known = &self.commands.known;

        if let Some(bad) = known
            .iter()
            .find(|c| c.is_empty() || c.chars().any(|c| c.is_whitespace() || c.is_control()))
        {
            return Err(Error::BadConfig(format!(
                "Known commands must be non-empty and free of whitespace. Problem: `{bad:?}`"
            )));
        }

        let duplicates = known.iter().duplicates().collect::<Vec<_>>();
        if !duplicates.is_empty() {
            return Err(Error::BadConfig(format!(
                "Known commands are listed more than once: {duplicates:?}"
            )));
        }

        let movement = known
            .iter()
            .filter(|c| Movement::from_token(c).is_some())
            .collect::<Vec<_>>();
        if !movement.is_empty() {
            return Err(Error::BadConfig(format!(
                "Movement commands are always gated, do not list them as known: {movement:?}"
            )));
        }

        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        self.check_devices()?;
        self.reconnect.validate()?;
        self.check_known_commands()?;

        Ok(())
    }
}
