//! The barcode scanner is drained on its own task for the lifetime of the process.
//!
//! The task is the only writer of the latest reading.
//! Everyone else holds a [`ScannerHandle`], which can only read.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{info, info_span, trace, warn, Instrument};

use crate::{
    config::DeviceConfig,
    endpoint::Connector,
    reconnect::{self, LinkState, ReconnectPolicy},
    serial::{codecs::lines::LinesCodec, error::DecodeError, SerialMessageBytes},
};

/// How many characters of a scanned line are kept.
pub const READING_LENGTH: usize = 5;

/// The most recent barcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeReading {
    /// At most [`READING_LENGTH`] characters.
    pub value: String,

    /// When the line arrived.
    pub captured_at: DateTime<Utc>,
}

/// Turn a line from the scanner into the value of a reading.
///
/// Surrounding whitespace is trimmed and only the first [`READING_LENGTH`] characters are kept.
/// Blank lines give `None`.
pub fn normalize_line(line: SerialMessageBytes) -> Result<Option<String>, DecodeError> {
    let text = String::from_utf8(line)?;
    let text = text.trim();

    if text.is_empty() {
        return Ok(None);
    }

    Ok(Some(text.chars().take(READING_LENGTH).collect()))
}

/// Read access to the scanner.
#[derive(Debug, Clone)]
pub struct ScannerHandle {
    reading: watch::Receiver<Option<BarcodeReading>>,
    state: watch::Receiver<LinkState>,
}

impl ScannerHandle {
    /// The most recent reading, if anything was scanned yet.
    pub fn latest(&self) -> Option<BarcodeReading> {
        self.reading.borrow().clone()
    }

    /// The state of the scanner link.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Observe new readings.
    pub fn readings(&self) -> watch::Receiver<Option<BarcodeReading>> {
        self.reading.clone()
    }

    /// Observe state changes.
    pub fn state_changes(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }
}

/// Start draining the scanner.
///
/// The returned task finishes when `shutdown` is cancelled,
/// or when the reconnect policy gives up.
pub fn start(
    device: DeviceConfig,
    connector: Connector,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
) -> (ScannerHandle, JoinHandle<()>) {
    let (reading_tx, reading_rx) = watch::channel(None);
    let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);

    let span = info_span!("scanner", id = %device.id);

    let handle = tokio::spawn(
        run(device, connector, policy, reading_tx, state_tx, shutdown).instrument(span),
    );

    (
        ScannerHandle {
            reading: reading_rx,
            state: state_rx,
        },
        handle,
    )
}

async fn run(
    device: DeviceConfig,
    connector: Connector,
    policy: ReconnectPolicy,
    readings: watch::Sender<Option<BarcodeReading>>,
    state: watch::Sender<LinkState>,
    shutdown: CancellationToken,
) {
    loop {
        let Some(opened) = reconnect::connect(&connector, &device, &policy, &state, &shutdown).await
        else {
            if *state.borrow() == LinkState::Failed {
                warn!("No barcodes until restart");
            }
            return;
        };

        state.send_replace(LinkState::Connected);

        let mut lines = FramedRead::new(opened, LinesCodec::default());

        let lost = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break false,
                line = lines.next() => match line {
                    Some(Ok(line)) => publish(&readings, line),
                    Some(Err(e)) => {
                        warn!(?e, "Read error, scanner lost");
                        break true;
                    }
                    None => {
                        warn!("Scanner went away");
                        break true;
                    }
                }
            }
        };

        state.send_replace(LinkState::Disconnected);

        if !lost {
            info!("Shutting down scanner");
            return;
        }
    }
}

fn publish(readings: &watch::Sender<Option<BarcodeReading>>, line: SerialMessageBytes) {
    match normalize_line(line) {
        Ok(Some(value)) => {
            info!(%value, "Barcode read");
            readings.send_replace(Some(BarcodeReading {
                value,
                captured_at: Utc::now(),
            }));
        }
        Ok(None) => trace!("Blank line"),
        Err(e) => warn!("Discarding line from scanner: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn normalize(line: &str) -> Option<String> {
        normalize_line(line.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn long_lines_keep_first_five() {
        assert_eq!(normalize("ABC123"), Some("ABC12".into()));
        assert_eq!(normalize("0123456789"), Some("01234".into()));
    }

    #[test]
    fn short_lines_are_unchanged() {
        assert_eq!(normalize("A"), Some("A".into()));
        assert_eq!(normalize("ABCD"), Some("ABCD".into()));
        assert_eq!(normalize("ABCDE"), Some("ABCDE".into()));
    }

    #[test]
    fn whitespace_is_trimmed_first() {
        assert_eq!(normalize("  AB12\r"), Some("AB12".into()));
        assert_eq!(normalize("\t XYZ98765 \r"), Some("XYZ98".into()));
    }

    #[test]
    fn blank_lines_are_nothing() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize(" \r"), None);
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert_eq!(normalize("ÇĞİÖŞÜ"), Some("ÇĞİÖŞ".into()));
    }

    #[test]
    fn bad_utf8_is_an_error() {
        let result = normalize_line(vec![b'A', 0xC3, 0x28, b'B']);

        assert!(matches!(result, Err(DecodeError::Utf8(_))));
    }

    #[test]
    fn publish_overwrites() {
        let (tx, rx) = watch::channel(None);

        publish(&tx, b"FIRST1".to_vec());
        assert_eq!(rx.borrow().as_ref().unwrap().value, "FIRST");

        publish(&tx, b"SECOND".to_vec());
        assert_eq!(rx.borrow().as_ref().unwrap().value, "SECON");
    }

    #[test]
    fn publish_skips_bad_lines() {
        let (tx, rx) = watch::channel(None);

        publish(&tx, b"GOOD".to_vec());
        publish(&tx, vec![0xff, 0xfe]);
        publish(&tx, b"   ".to_vec());

        assert_eq!(rx.borrow().as_ref().unwrap().value, "GOOD");
    }
}
