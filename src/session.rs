use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::gate::CommandGate;

/// Identifies a control session in logs and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Puts shared control state back to its defaults whenever
/// the control surface is loaded or reloaded.
///
/// Manual movement must never carry across page reloads.
#[derive(Debug, Clone)]
pub struct SessionReset {
    gate: CommandGate,
}

impl SessionReset {
    /// Resets the given gate.
    pub fn new(gate: CommandGate) -> Self {
        Self { gate }
    }

    /// Start a new control session.
    /// Must happen before any other work for that session.
    pub fn begin(&self, user_agent: Option<&str>) -> SessionId {
        self.gate.reset();

        let session = SessionId(Uuid::new_v4());
        info!(
            %session,
            user_agent = user_agent.unwrap_or("unknown"),
            "New control session, manual control disabled"
        );

        session
    }
}
