//! Mocked endpoints, useful to run and test the gateway without the actual serial ports.
//!
//! Opening a mock creates an in-memory byte pipe.
//! The gateway gets one end, the other end (the "far end") plays the role of the device.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use futures::StreamExt;
use tokio::{
    io::{AsyncWriteExt, DuplexStream},
    sync::{mpsc, Mutex as AsyncMutex},
};
use tokio_util::codec::{Framed, FramedRead};
use tracing::{debug, info};

use crate::serial::{
    codecs::lines::LinesCodec, error::ConnectError, SerialMessage, SerialMessageBytes,
};

/// How many bytes may be in flight between the two ends of a mock.
const MOCK_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    None,
    Next(u32),
    Always,
}

#[derive(Debug)]
struct MockState {
    refusal: Refusal,
    times_opened: u32,
    far_ends_sender: mpsc::UnboundedSender<DuplexStream>,
    far_ends_receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<DuplexStream>>>,
}

impl Default for MockState {
    fn default() -> Self {
        let (far_ends_sender, far_ends_receiver) = mpsc::unbounded_channel();

        Self {
            refusal: Refusal::None,
            times_opened: 0,
            far_ends_sender,
            far_ends_receiver: Arc::new(AsyncMutex::new(far_ends_receiver)),
        }
    }
}

impl MockState {
    fn should_refuse(&mut self) -> bool {
        match self.refusal {
            Refusal::None => false,
            Refusal::Always => true,
            Refusal::Next(n) => {
                self.refusal = if n <= 1 {
                    Refusal::None
                } else {
                    Refusal::Next(n - 1)
                };
                true
            }
        }
    }
}

/// A registry of mock endpoints, shared by clones.
///
/// Mocks are created on first use, by name.
#[derive(Debug, Clone, Default)]
pub struct MockEndpoints {
    mocks: Arc<Mutex<HashMap<String, MockState>>>,

    /// If set, far ends are drained and logged instead of being handed out.
    drain: bool,
}

impl MockEndpoints {
    /// Mocks whose far ends log whatever the gateway writes.
    /// Nothing is ever sent to the gateway.
    pub fn draining() -> Self {
        Self {
            drain: true,
            ..Default::default()
        }
    }

    fn with_mock<T>(&self, name: &str, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut mocks = self.mocks.lock().unwrap_or_else(PoisonError::into_inner);
        f(mocks.entry(name.to_owned()).or_default())
    }

    /// Refuse the next `attempts` attempts at opening the mock.
    pub fn refuse_next(&self, name: &str, attempts: u32) {
        self.with_mock(name, |mock| mock.refusal = Refusal::Next(attempts));
    }

    /// Refuse all attempts at opening the mock, until [`MockEndpoints::accept`].
    pub fn refuse_always(&self, name: &str) {
        self.with_mock(name, |mock| mock.refusal = Refusal::Always);
    }

    /// Let attempts at opening the mock succeed again.
    pub fn accept(&self, name: &str) {
        self.with_mock(name, |mock| mock.refusal = Refusal::None);
    }

    /// How many times the mock was successfully opened.
    pub fn times_opened(&self, name: &str) -> u32 {
        self.with_mock(name, |mock| mock.times_opened)
    }

    /// Wait for the gateway to open the mock, and get the device's side of it.
    ///
    /// Connections are handed out in the order they were opened.
    /// Never resolves for [`MockEndpoints::draining`] mocks.
    pub async fn next_connection(&self, name: &str) -> Option<MockPeer> {
        let receiver = self.with_mock(name, |mock| mock.far_ends_receiver.clone());

        let far_end = receiver.lock().await.recv().await?;

        Some(MockPeer::new(far_end))
    }

    pub(crate) fn open(&self, name: &str) -> Result<DuplexStream, ConnectError> {
        let (near_end, far_end) = tokio::io::duplex(MOCK_BUFFER_SIZE);

        let far_end = self.with_mock(name, |mock| {
            if mock.should_refuse() {
                return Err(ConnectError::MockRefused(name.to_owned()));
            }
            mock.times_opened += 1;

            if self.drain {
                Ok(Some(far_end))
            } else {
                // The receiving side lives as long as the registry, so this cannot fail.
                let _ = mock.far_ends_sender.send(far_end);
                Ok(None)
            }
        })?;

        if let Some(far_end) = far_end {
            tokio::spawn(drain(name.to_owned(), far_end));
        }

        info!(%name, "Mock opened");

        Ok(near_end)
    }
}

async fn drain(name: String, far_end: DuplexStream) {
    let mut lines = FramedRead::new(far_end, LinesCodec::default());

    while let Some(Ok(line)) = lines.next().await {
        info!(%name, line = %SerialMessage::new_lossy(&line), "Mock received");
    }

    debug!(%name, "Mock closed");
}

/// The device side of an open mock.
///
/// Dropping it makes the gateway see a disconnected device.
#[derive(Debug)]
pub struct MockPeer {
    framed: Framed<DuplexStream, LinesCodec>,
}

impl MockPeer {
    fn new(far_end: DuplexStream) -> Self {
        Self {
            framed: Framed::new(far_end, LinesCodec::default()),
        }
    }

    /// Send a newline terminated line to the gateway.
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');

        self.send_bytes(&bytes).await
    }

    /// Send raw bytes to the gateway, no delimiter added.
    pub async fn send_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await
    }

    /// The next line the gateway wrote, without its delimiter.
    /// `None` if the gateway closed the connection.
    pub async fn next_line(&mut self) -> Option<SerialMessageBytes> {
        match self.framed.next().await {
            Some(Ok(line)) => Some(line),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        time::timeout,
    };

    use super::*;

    #[tokio::test]
    async fn far_end_sees_what_near_end_writes() {
        let mocks = MockEndpoints::default();

        let mut near_end = mocks.open("controller").unwrap();
        let mut peer = timeout(Duration::from_secs(1), mocks.next_connection("controller"))
            .await
            .unwrap()
            .unwrap();

        near_end.write_all(b"MANUEL_SOL\n").await.unwrap();

        assert_eq!(peer.next_line().await.unwrap(), b"MANUEL_SOL".to_vec());
    }

    #[tokio::test]
    async fn near_end_sees_what_far_end_sends() {
        let mocks = MockEndpoints::default();

        let near_end = mocks.open("scanner").unwrap();
        let mut peer = mocks.next_connection("scanner").await.unwrap();

        peer.send_line("ABC123").await.unwrap();

        let mut line = String::new();
        BufReader::new(near_end).read_line(&mut line).await.unwrap();
        assert_eq!(line, "ABC123\n");
    }

    #[tokio::test]
    async fn refuses_a_number_of_times() {
        let mocks = MockEndpoints::default();
        mocks.refuse_next("flaky", 2);

        assert!(mocks.open("flaky").is_err());
        assert!(mocks.open("flaky").is_err());
        assert!(mocks.open("flaky").is_ok());
        assert_eq!(mocks.times_opened("flaky"), 1);
    }

    #[tokio::test]
    async fn refuses_until_accepting() {
        let mocks = MockEndpoints::default();
        mocks.refuse_always("gone");

        for _ in 0..5 {
            assert!(matches!(
                mocks.open("gone"),
                Err(ConnectError::MockRefused(name)) if name == "gone"
            ));
        }

        mocks.accept("gone");
        assert!(mocks.open("gone").is_ok());
    }

    #[tokio::test]
    async fn clones_share_mocks() {
        let mocks = MockEndpoints::default();
        let clone = mocks.clone();

        let _near_end = clone.open("shared").unwrap();

        assert_eq!(mocks.times_opened("shared"), 1);
    }
}
