use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{config::DeviceConfig, serial::error::ConnectError};

pub mod mock;
pub(crate) mod serial;

pub use mock::MockEndpoints;

/// A device the gateway talks to.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum EndpointId {
    /// A tty/COM endpoint.
    Tty(String),

    /// An in-memory endpoint, see [`MockEndpoints`].
    Mock(String),
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointId::Tty(tty) => {
                // Reduce log verbosity
                let tty = tty.strip_prefix("/dev/serial/by-id/").unwrap_or(tty);

                write!(f, "tty: {tty}")
            }
            EndpointId::Mock(mock) => write!(f, "mock: {mock}"),
        }
    }
}

impl EndpointId {
    /// A new TTY endpoint identifier.
    pub fn tty(tty: &str) -> Self {
        Self::Tty(tty.into())
    }

    /// A id for a mock endpoint.
    pub fn mock(name: &str) -> Self {
        Self::Mock(name.into())
    }

    /// Borrow endpoint id as the mock variant.
    pub fn as_mock(&self) -> Option<&String> {
        if let Self::Mock(v) = self {
            Some(v)
        } else {
            None
        }
    }

    /// Borrow endpoint id as the TTY variant.
    pub fn as_tty(&self) -> Option<&String> {
        if let Self::Tty(v) = self {
            Some(v)
        } else {
            None
        }
    }
}

/// Something bytes can be read from and written to,
/// such as an open serial port.
pub trait Device: AsyncRead + AsyncWrite + Send + Unpin {}

/// Automatically provide [`Device`] for anything that can do async IO.
impl<T> Device for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Opens configured endpoints.
///
/// TTYs go to the serial port driver, mocks to the [`MockEndpoints`] given at construction.
#[derive(Debug, Clone, Default)]
pub struct Connector {
    mocks: MockEndpoints,
}

impl Connector {
    /// A connector using the given mocks for [`EndpointId::Mock`] endpoints.
    pub fn new(mocks: MockEndpoints) -> Self {
        Self { mocks }
    }

    /// A single attempt at opening the device.
    pub fn open(&self, device: &DeviceConfig) -> Result<Box<dyn Device>, ConnectError> {
        match &device.id {
            EndpointId::Tty(path) => {
                let stream = serial::open(path, device)?;
                Ok(Box::new(stream))
            }
            EndpointId::Mock(name) => {
                let stream = self.mocks.open(name)?;
                Ok(Box::new(stream))
            }
        }
    }
}
