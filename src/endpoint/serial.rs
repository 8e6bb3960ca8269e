//! A serial port endpoint.

use std::time::Duration;

use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use crate::{config::DeviceConfig, serial::error::ConnectError};

pub(crate) fn open(path: &str, device: &DeviceConfig) -> Result<SerialStream, ConnectError> {
    debug!(%path, baud = device.baud, flow_control = ?device.flow_control, "Opening serial port");

    tokio_serial::new(path, device.baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(device.flow_control)
        .timeout(Duration::from_millis(device.open_timeout_ms))
        .open_native_async()
        .map_err(|source| ConnectError::Serial {
            path: path.to_owned(),
            source,
        })
}
