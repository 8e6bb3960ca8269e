use std::net::SocketAddr;

use axum::{
    response::{Html, IntoResponse},
    routing::{get, post},
    Extension, Json, Router, TypedHeader,
};
use headers::UserAgent;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    actions::{
        Barcode, CommandOutcome, ManualControl, PageBarcode, SendCommand, SessionStarted,
        SetManualControl, Status,
    },
    config::Config,
    endpoint::Connector,
    error::Error,
    gateway::Gateway,
};

/// The routes of the control surface.
///
/// Request bodies are taken as plain strings and parsed here,
/// so that malformed json gets a [`Error::BadJson`] response which shows the problem.
pub fn app(gateway: Gateway, config: Config) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/session", post(new_session))
        .route("/api/barcode", get(barcode))
        .route("/api/manual-control", post(manual_control))
        .route("/api/command", post(command))
        .route("/api/status", get(status))
        // What the bundled control page calls
        .route("/api/komut", post(command))
        .route("/api/manuel_kontrol", post(manual_control))
        .route("/api/barkod", get(page_barcode))
        .route("/config", get(show_config))
        .route("/version", get(show_version))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Every handler works on the same gateway
                .layer(Extension(gateway))
                // The gateway config should be known to the web server
                .layer(Extension(config)),
        )
}

async fn run(
    config: Config,
    connector: Connector,
    shutdown: CancellationToken,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    config.validate()?;

    let (gateway, tasks) = Gateway::start(&config, connector, shutdown.clone());

    let app = app(gateway, config);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::InternalIssue(format!("Could not bind to {addr}: {e}")))?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            warn!("Nobody is waiting for the allocated port");
        }
    }

    info!("listening on {}", addr);

    let stop = shutdown.clone();
    let served = server
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await;

    // Make sure the background tasks stop even if the server stopped on its own.
    shutdown.cancel();
    tasks.join().await;

    served.map_err(|e| Error::InternalIssue(format!("Server error: {e}")))
}

/// Start the gateway on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
///
/// Runs until `shutdown` is cancelled.
pub async fn run_any_port(
    config: Config,
    connector: Connector,
    shutdown: CancellationToken,
    allocated_port: oneshot::Sender<u16>,
) -> Result<(), Error> {
    run(config, connector, shutdown, None, Some(allocated_port)).await
}

/// Start the gateway on the given port.
///
/// Runs until `shutdown` is cancelled.
pub async fn run_on_port(
    config: Config,
    connector: Connector,
    shutdown: CancellationToken,
    port: u16,
) -> Result<(), Error> {
    run(config, connector, shutdown, Some(port), None).await
}

async fn index(
    Extension(gateway): Extension<Gateway>,
    Extension(config): Extension<Config>,
    user_agent: Option<TypedHeader<UserAgent>>,
) -> Html<String> {
    let user_agent = user_agent.as_ref().map(|TypedHeader(agent)| agent.as_str());
    let SessionStarted { session } = gateway.begin_session(user_agent);

    if let Some(page) = &config.index_page {
        match tokio::fs::read_to_string(page).await {
            Ok(page) => return Html(page),
            Err(e) => warn!(?page, "Could not read index page, serving placeholder: {e}"),
        }
    }

    Html(format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head><title>Serial Gateway</title></head>\n\
         <body>\n\
         <h1>Serial Gateway v{}</h1>\n\
         <p>Session <code>{session}</code> started, manual control is disabled.</p>\n\
         </body>\n\
         </html>\n",
        env!("CARGO_PKG_VERSION")
    ))
}

async fn new_session(
    Extension(gateway): Extension<Gateway>,
    user_agent: Option<TypedHeader<UserAgent>>,
) -> Json<SessionStarted> {
    let user_agent = user_agent.as_ref().map(|TypedHeader(agent)| agent.as_str());

    Json(gateway.begin_session(user_agent))
}

async fn barcode(Extension(gateway): Extension<Gateway>) -> Json<Barcode> {
    Json(gateway.latest_barcode().await)
}

async fn page_barcode(Extension(gateway): Extension<Gateway>) -> Json<PageBarcode> {
    Json(gateway.latest_barcode().await.into())
}

async fn manual_control(
    Extension(gateway): Extension<Gateway>,
    body: String,
) -> Result<Json<ManualControl>, Error> {
    let SetManualControl { enabled } = Error::parse_json(&body)?;

    Ok(Json(gateway.set_manual_control(enabled)))
}

async fn command(
    Extension(gateway): Extension<Gateway>,
    body: String,
) -> Result<Json<CommandOutcome>, Error> {
    let SendCommand { command } = Error::parse_json(&body)?;

    Ok(Json(gateway.dispatch(&command).await?))
}

async fn status(Extension(gateway): Extension<Gateway>) -> Json<Status> {
    Json(gateway.status())
}

async fn show_config(Extension(config): Extension<Config>) -> impl IntoResponse {
    config.serialize_pretty()
}

async fn show_version() -> impl IntoResponse {
    format!("Serial Gateway v{}\n", env!("CARGO_PKG_VERSION"))
}
