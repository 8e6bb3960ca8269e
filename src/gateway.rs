//! Everything the control surface can ask of the gateway, wired together.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    actions::{Barcode, CommandOutcome, ManualControl, SessionStarted, Status},
    config::Config,
    dispatch::{CommandDispatcher, Vocabulary},
    endpoint::Connector,
    error::Error,
    gate::CommandGate,
    link::SerialLink,
    scanner::{self, ScannerHandle},
    session::SessionReset,
};

/// The background tasks of a [`Gateway`].
#[derive(Debug)]
pub struct BackgroundTasks {
    link: JoinHandle<()>,
    scanner: JoinHandle<()>,
}

impl BackgroundTasks {
    /// Wait for the tasks to finish.
    /// They do so after the shutdown token given to [`Gateway::start`] is cancelled.
    pub async fn join(self) {
        for (name, task) in [("controller", self.link), ("scanner", self.scanner)] {
            match task.await {
                Ok(()) => debug!(%name, "Task joined"),
                Err(e) => warn!(%name, "Task join error: {e:?}"),
            }
        }
    }
}

/// A cheaply cloneable handle to the gateway.
#[derive(Debug, Clone)]
pub struct Gateway {
    gate: CommandGate,
    session: SessionReset,
    link: SerialLink,
    scanner: ScannerHandle,
    dispatcher: CommandDispatcher,
}

impl Gateway {
    /// Start the controller link and the scanner.
    ///
    /// Neither device needs to be available, the gateway serves requests regardless.
    pub fn start(
        config: &Config,
        connector: Connector,
        shutdown: CancellationToken,
    ) -> (Self, BackgroundTasks) {
        let gate = CommandGate::default();

        let (link, link_task) = SerialLink::start(
            config.controller.clone(),
            connector.clone(),
            config.reconnect.clone(),
            config.write_timeout(),
            shutdown.clone(),
        );

        let (scanner, scanner_task) = scanner::start(
            config.scanner.clone(),
            connector,
            config.reconnect.clone(),
            shutdown,
        );

        let dispatcher = CommandDispatcher::new(
            gate.clone(),
            link.clone(),
            Vocabulary::from(&config.commands),
        );

        let gateway = Self {
            session: SessionReset::new(gate.clone()),
            gate,
            link,
            scanner,
            dispatcher,
        };

        (
            gateway,
            BackgroundTasks {
                link: link_task,
                scanner: scanner_task,
            },
        )
    }

    /// The control surface was (re)loaded.
    pub fn begin_session(&self, user_agent: Option<&str>) -> SessionStarted {
        SessionStarted {
            session: self.session.begin(user_agent),
        }
    }

    /// The latest barcode.
    ///
    /// Also passes it on to the controller, if there is one and the link is open.
    pub async fn latest_barcode(&self) -> Barcode {
        let reading = self.scanner.latest();

        let (barcode, captured_at) = match reading {
            Some(reading) => (reading.value, Some(reading.captured_at)),
            None => (String::new(), None),
        };

        let relayed = if barcode.is_empty() {
            debug!("No barcode to send to controller");
            false
        } else if !self.link.is_open() {
            info!(%barcode, "Controller link not open, barcode not sent");
            false
        } else {
            match self.link.write(barcode.as_str()).await {
                Ok(()) => {
                    info!(%barcode, "Barcode sent to controller");
                    true
                }
                Err(e) => {
                    warn!(%barcode, "Barcode not sent to controller: {e}");
                    false
                }
            }
        };

        Barcode {
            barcode,
            captured_at,
            relayed,
        }
    }

    /// Enable or disable manual movement.
    pub fn set_manual_control(&self, enabled: bool) -> ManualControl {
        self.gate.set(enabled);
        info!(%enabled, "Manual control updated");

        ManualControl {
            manual_control: enabled,
        }
    }

    /// Dispatch a command to the controller.
    pub async fn dispatch(&self, command: &str) -> Result<CommandOutcome, Error> {
        let result = self.dispatcher.dispatch(command).await?;

        Ok(CommandOutcome {
            command: command.trim().to_owned(),
            result,
        })
    }

    /// How the devices are doing.
    pub fn status(&self) -> Status {
        Status {
            controller: self.link.state(),
            scanner: self.scanner.state(),
            manual_control: self.gate.get(),
        }
    }

    /// The manual control gate.
    pub fn gate(&self) -> &CommandGate {
        &self.gate
    }

    /// The controller link.
    pub fn link(&self) -> &SerialLink {
        &self.link
    }

    /// The scanner.
    pub fn scanner(&self) -> &ScannerHandle {
        &self.scanner
    }
}
