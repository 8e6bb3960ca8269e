#![allow(dead_code)]

use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    http::{Method, Request, StatusCode},
    Router,
};
use color_eyre::{eyre::eyre, Result};
use serial_gateway::{
    config::Config,
    endpoint::{mock::MockPeer, Connector, MockEndpoints},
    gateway::{BackgroundTasks, Gateway},
    reconnect::{LinkState, ReconnectPolicy},
    server,
};
use tokio::{sync::watch, time::timeout};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// How long tests wait for anything.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Both devices mocked, and no waiting around when (re)connecting.
pub fn fast_config() -> Config {
    let mut config = Config::mocked();

    config.controller.settle_ms = 0;
    config.reconnect = ReconnectPolicy {
        initial_delay_ms: 5,
        max_delay_ms: 20,
        max_attempts: 3,
    };

    config
}

/// A running gateway on mocked devices.
pub struct Harness {
    pub mocks: MockEndpoints,
    pub gateway: Gateway,
    pub config: Config,
    shutdown: CancellationToken,
    tasks: Option<BackgroundTasks>,
}

impl Harness {
    /// The HTTP interface of this gateway.
    pub fn app(&self) -> Router {
        server::app(self.gateway.clone(), self.config.clone())
    }

    /// Stop the background tasks and wait for them.
    pub async fn stop(mut self) -> Result<()> {
        self.shutdown.cancel();

        if let Some(tasks) = self.tasks.take() {
            timeout(TIMEOUT, tasks.join()).await?;
        }

        Ok(())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn start() -> Harness {
    start_with(fast_config(), MockEndpoints::default())
}

/// Start with the given mocks, which may have been told to refuse connections.
pub fn start_with(config: Config, mocks: MockEndpoints) -> Harness {
    let shutdown = CancellationToken::new();

    let (gateway, tasks) = Gateway::start(&config, Connector::new(mocks.clone()), shutdown.clone());

    Harness {
        mocks,
        gateway,
        config,
        shutdown,
        tasks: Some(tasks),
    }
}

/// Wait for the gateway to open the named mock.
pub async fn connection(mocks: &MockEndpoints, name: &str) -> Result<MockPeer> {
    timeout(TIMEOUT, mocks.next_connection(name))
        .await?
        .ok_or_else(|| eyre!("Mock {name} went away"))
}

pub async fn wait_for_state(
    mut states: watch::Receiver<LinkState>,
    wanted: LinkState,
) -> Result<()> {
    let wait = async {
        loop {
            let current = *states.borrow_and_update();
            if current == wanted {
                break;
            }
            states.changed().await?;
        }
        Result::<()>::Ok(())
    };

    timeout(TIMEOUT, wait)
        .await
        .map_err(|_| eyre!("Link never reached state {wanted}"))?
}

/// Connect both mocks and wait until the gateway sees them as connected.
pub async fn connect_both(harness: &Harness) -> Result<(MockPeer, MockPeer)> {
    let controller = connection(&harness.mocks, "controller").await?;
    let scanner = connection(&harness.mocks, "scanner").await?;

    wait_for_state(harness.gateway.link().state_changes(), LinkState::Connected).await?;
    wait_for_state(harness.gateway.scanner().state_changes(), LinkState::Connected).await?;

    Ok((controller, scanner))
}

/// Wait until the latest barcode is the wanted one.
pub async fn wait_for_barcode(gateway: &Gateway, wanted: &str) -> Result<()> {
    let mut readings = gateway.scanner().readings();

    let wait = async {
        loop {
            let found = readings
                .borrow_and_update()
                .as_ref()
                .map(|reading| reading.value == wanted)
                .unwrap_or(false);
            if found {
                break;
            }
            readings.changed().await?;
        }
        Result::<()>::Ok(())
    };

    timeout(TIMEOUT, wait)
        .await
        .map_err(|_| eyre!("Barcode {wanted} never showed up"))?
}

/// The next line the device side of a mock receives.
pub async fn next_line(peer: &mut MockPeer) -> Result<String> {
    let line = timeout(TIMEOUT, peer.next_line())
        .await?
        .ok_or_else(|| eyre!("Gateway closed the connection"))?;

    Ok(String::from_utf8(line)?)
}

async fn request(
    app: Router,
    method: Method,
    uri: &str,
    body: Body,
) -> Result<(StatusCode, String)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)?;

    let response = timeout(TIMEOUT, app.oneshot(request)).await??;
    let status = response.status();

    let mut body = response.into_body();
    let mut bytes = vec![];
    while let Some(chunk) = body.data().await {
        bytes.extend_from_slice(&chunk?);
    }

    Ok((status, String::from_utf8(bytes)?))
}

pub async fn get(app: Router, uri: &str) -> Result<(StatusCode, String)> {
    request(app, Method::GET, uri, Body::empty()).await
}

pub async fn post(app: Router, uri: &str, body: &str) -> Result<(StatusCode, String)> {
    request(app, Method::POST, uri, Body::from(body.to_owned())).await
}
