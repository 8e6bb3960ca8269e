//! The link to the vehicle controller.
//!
//! A supervisor task owns the connection lifecycle, see [`crate::reconnect`].
//! Writers share the open device through an async mutex,
//! so only one write is ever in flight and lines never interleave on the wire.

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{ReadHalf, WriteHalf},
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    config::DeviceConfig,
    endpoint::{Connector, Device, EndpointId},
    reconnect::{self, LinkState, ReconnectPolicy},
    serial::{
        codecs::lines::LinesCodec, error::WriteError, SerialMessage, SerialMessageBytes,
    },
};

type LineWriter = FramedWrite<WriteHalf<Box<dyn Device>>, LinesCodec>;
type LineReader = FramedRead<ReadHalf<Box<dyn Device>>, LinesCodec>;

struct Inner {
    device: DeviceConfig,
    writer: Mutex<Option<LineWriter>>,
    state: watch::Sender<LinkState>,
    write_timeout: Duration,
}

/// A handle to the controller link. Clones share the link.
#[derive(Clone)]
pub struct SerialLink {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("id", &self.inner.device.id)
            .field("state", &self.state())
            .finish()
    }
}

impl SerialLink {
    /// Start supervising the link.
    ///
    /// The first connection attempt happens right away on the supervisor task.
    /// If it fails the link is simply not open, and the supervisor keeps trying
    /// according to the policy.
    /// The returned handle finishes when `shutdown` is cancelled
    /// or the link has [`LinkState::Failed`].
    pub fn start(
        device: DeviceConfig,
        connector: Connector,
        policy: ReconnectPolicy,
        write_timeout: Duration,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (state, _) = watch::channel(LinkState::Disconnected);

        let span = info_span!("controller", id = %device.id);

        let inner = Arc::new(Inner {
            device,
            writer: Mutex::new(None),
            state,
            write_timeout,
        });

        let handle =
            tokio::spawn(supervise(inner.clone(), connector, policy, shutdown).instrument(span));

        (Self { inner }, handle)
    }

    /// Is the link open right now?
    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// The current state.
    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    /// Observe state changes.
    pub fn state_changes(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// Which device this link is for.
    pub fn endpoint(&self) -> &EndpointId {
        &self.inner.device.id
    }

    /// Put the payload on the wire as a single newline terminated line.
    ///
    /// Failing writes mark the link as lost, which makes the supervisor reconnect.
    pub async fn write(&self, payload: impl Into<SerialMessageBytes>) -> Result<(), WriteError> {
        let payload = payload.into();
        let mut writer = self.inner.writer.lock().await;

        let Some(sink) = writer.as_mut() else {
            warn!(id = %self.inner.device.id, "Link not open, nothing written");
            return Err(WriteError::NotConnected(self.inner.device.id.clone()));
        };

        let error = match tokio::time::timeout(self.inner.write_timeout, sink.send(payload)).await
        {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => WriteError::from(e),
            Err(_) => WriteError::Timeout(self.inner.write_timeout),
        };

        warn!(id = %self.inner.device.id, "Write failed, dropping the link: {error}");

        // Nobody can know how much made it out, so start over with a fresh connection.
        *writer = None;
        self.inner.state.send_replace(LinkState::Disconnected);

        Err(error)
    }
}

async fn supervise(
    inner: Arc<Inner>,
    connector: Connector,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
) {
    loop {
        let Some(device) =
            reconnect::connect(&connector, &inner.device, &policy, &inner.state, &shutdown).await
        else {
            debug!("Supervisor done");
            return;
        };

        let (reader, writer) = tokio::io::split(device);

        // Subscribed before any writer can see the device, so a write failing
        // right away is still noticed as a change.
        let state = inner.state.subscribe();

        {
            let mut slot = inner.writer.lock().await;
            *slot = Some(FramedWrite::new(writer, LinesCodec::default()));
            inner.state.send_replace(LinkState::Connected);
        }

        let lost = watch_connection(
            state,
            FramedRead::new(reader, LinesCodec::default()),
            &shutdown,
        )
        .await;

        {
            let mut slot = inner.writer.lock().await;
            slot.take();
            inner.state.send_replace(LinkState::Disconnected);
        }

        if !lost {
            info!("Shutting down link");
            return;
        }
    }
}

/// Wait for the connection to go away.
/// Returns `false` if it was us closing it.
async fn watch_connection(
    mut state: watch::Receiver<LinkState>,
    mut from_controller: LineReader,
    shutdown: &CancellationToken,
) -> bool {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() != LinkState::Connected {
                    // A writer gave up on the device.
                    return true;
                }
            }
            line = from_controller.next() => match line {
                Some(Ok(line)) => {
                    debug!(line = %SerialMessage::new_lossy(&line), "From controller");
                }
                Some(Err(e)) => {
                    warn!(?e, "Read error, link lost");
                    return true;
                }
                None => {
                    warn!("Controller went away");
                    return true;
                }
            }
        }
    }
}
