use std::{io, string, time::Duration};

use thiserror::Error;

use crate::endpoint::EndpointId;

/// Problems on the wire, as seen by the line codec.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// IO related errors.
    #[error("Underlying IO problem")]
    IO(#[from] io::Error),
}

/// A device could not be opened.
///
/// Degrades the owning component only.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The serial port driver refused to open the port.
    #[error("Could not open port at {path}")]
    Serial {
        /// Path of the port.
        path: String,

        /// What the driver said.
        #[source]
        source: tokio_serial::Error,
    },

    /// A mock endpoint was told to refuse connections.
    #[error("Mock endpoint `{0}` refused the connection")]
    MockRefused(String),
}

/// A write to the controller did not make it onto the wire.
#[derive(Debug, Error)]
pub enum WriteError {
    /// There is no open link right now.
    #[error("No open link to {0}")]
    NotConnected(EndpointId),

    /// The device did not accept the bytes in time.
    #[error("Write did not complete within {0:?}")]
    Timeout(Duration),

    /// The device failed the write.
    #[error("Write failed")]
    Wire(#[from] SerialPortError),
}

/// A line from the scanner was not valid text.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Utf8 related errors.
    #[error("Problem with UTF8 conversion")]
    Utf8(#[from] string::FromUtf8Error),
}
