//! Commands from the control surface, and deciding what reaches the controller.

use std::{collections::HashSet, fmt::Display, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
    config::CommandConfig, error::Error, gate::CommandGate, link::SerialLink,
    serial::error::WriteError,
};

/// A manual movement command.
/// These only reach the controller while manual control is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Movement {
    /// Drive forward.
    Forward,

    /// Drive backward.
    Back,

    /// Turn left.
    Left,

    /// Turn right.
    Right,
}

impl Movement {
    /// All movements.
    pub const ALL: [Movement; 4] = [
        Movement::Forward,
        Movement::Back,
        Movement::Left,
        Movement::Right,
    ];

    /// The token the control surface sends for this movement.
    pub fn token(&self) -> &'static str {
        match self {
            Movement::Forward => "MANUEL_ILERI",
            Movement::Back => "MANUEL_GERI",
            Movement::Left => "MANUEL_SOL",
            Movement::Right => "MANUEL_SAG",
        }
    }

    /// Recognize a movement token.
    ///
    /// Case is ignored, and `MANUAL_` is accepted in place of `MANUEL_`,
    /// so that no spelling of a movement slips past the gate.
    pub fn from_token(token: &str) -> Option<Self> {
        let upper = token.to_ascii_uppercase();
        let direction = upper
            .strip_prefix("MANUEL_")
            .or_else(|| upper.strip_prefix("MANUAL_"))?;

        match direction {
            "ILERI" => Some(Movement::Forward),
            "GERI" => Some(Movement::Back),
            "SOL" => Some(Movement::Left),
            "SAG" => Some(Movement::Right),
            _ => None,
        }
    }
}

/// What to do with commands nobody told us about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UnknownCommands {
    /// Send them to the controller anyway.
    #[default]
    Forward,

    /// Do not send them.
    Reject,
}

/// A command as received from the control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    token: String,
    received_at: DateTime<Utc>,
}

impl Command {
    /// Validate a token.
    ///
    /// Surrounding whitespace is removed.
    /// What remains must be non-empty and must not contain control characters,
    /// since it has to fit on a single line on the wire.
    pub fn parse(token: &str) -> Result<Self, Error> {
        let token = token.trim();

        if token.is_empty() {
            return Err(Error::BadCommand("The command is empty".into()));
        }

        if token.chars().any(char::is_control) {
            return Err(Error::BadCommand(format!(
                "The command {token:?} contains control characters"
            )));
        }

        Ok(Self {
            token: token.to_owned(),
            received_at: Utc::now(),
        })
    }

    /// The token, as it will be put on the wire.
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// When the command arrived.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token)
    }
}

/// What kind of command something is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Manual movement, gated.
    Movement(Movement),

    /// Listed in the configuration.
    Known,

    /// Anything else.
    Unknown,
}

impl Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Movement(movement) => write!(f, "movement ({movement:?})"),
            Classification::Known => write!(f, "known"),
            Classification::Unknown => write!(f, "unknown"),
        }
    }
}

/// The commands the gateway knows about.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    known: HashSet<String>,
    unknown: UnknownCommands,
}

impl Vocabulary {
    /// Classify a command.
    pub fn classify(&self, command: &Command) -> Classification {
        if let Some(movement) = Movement::from_token(command.as_str()) {
            Classification::Movement(movement)
        } else if self.known.contains(command.as_str()) {
            Classification::Known
        } else {
            Classification::Unknown
        }
    }
}

impl From<&CommandConfig> for Vocabulary {
    fn from(config: &CommandConfig) -> Self {
        Self {
            known: config.known.iter().cloned().collect(),
            unknown: config.unknown,
        }
    }
}

/// What happened to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchResult {
    /// It was written to the controller.
    Forwarded,

    /// Manual movement while manual control is disabled. Nothing written.
    Blocked,

    /// No open link to the controller. Nothing written.
    LinkUnavailable,

    /// Writing to the controller failed.
    WriteFailed,

    /// Unknown commands are not accepted. Nothing written.
    Rejected,
}

impl Display for DispatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DispatchResult::Forwarded => "forwarded",
            DispatchResult::Blocked => "blocked",
            DispatchResult::LinkUnavailable => "link-unavailable",
            DispatchResult::WriteFailed => "write-failed",
            DispatchResult::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// Validates commands and forwards the permitted ones.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    gate: CommandGate,
    link: SerialLink,
    vocabulary: Arc<Vocabulary>,
}

impl CommandDispatcher {
    /// A dispatcher which consults the gate before writing movement to the link.
    pub fn new(gate: CommandGate, link: SerialLink, vocabulary: Vocabulary) -> Self {
        Self {
            gate,
            link,
            vocabulary: Arc::new(vocabulary),
        }
    }

    /// Dispatch a command token.
    ///
    /// Only malformed tokens are errors, everything else is a [`DispatchResult`].
    pub async fn dispatch(&self, token: &str) -> Result<DispatchResult, Error> {
        let command = Command::parse(token)?;
        let classification = self.vocabulary.classify(&command);

        info!(%command, %classification, "Command received");

        let result = self.decide(&command, classification).await;

        match result {
            DispatchResult::Forwarded => {
                info!(%command, %classification, %result, "Sent to controller")
            }
            DispatchResult::Blocked => {
                warn!(%command, %classification, %result, "Manual control is disabled, not sent")
            }
            DispatchResult::Rejected => {
                warn!(%command, %classification, %result, "Unknown commands are rejected, not sent")
            }
            DispatchResult::LinkUnavailable => {
                warn!(%command, %classification, %result, "Controller link is not open, not sent")
            }
            DispatchResult::WriteFailed => {
                error!(%command, %classification, %result, "Could not send to controller")
            }
        }

        Ok(result)
    }

    async fn decide(&self, command: &Command, classification: Classification) -> DispatchResult {
        match classification {
            Classification::Movement(_) if !self.gate.get() => return DispatchResult::Blocked,
            Classification::Unknown if self.vocabulary.unknown == UnknownCommands::Reject => {
                return DispatchResult::Rejected
            }
            _ => {}
        }

        if !self.link.is_open() {
            return DispatchResult::LinkUnavailable;
        }

        match self.link.write(command.as_str()).await {
            Ok(()) => DispatchResult::Forwarded,
            Err(WriteError::NotConnected(_)) => DispatchResult::LinkUnavailable,
            Err(e) => {
                warn!(%command, "Write error: {e}");
                DispatchResult::WriteFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn command(token: &str) -> Command {
        Command::parse(token).unwrap()
    }

    #[test]
    fn movement_tokens() {
        for movement in Movement::ALL {
            assert_eq!(Movement::from_token(movement.token()), Some(movement));
        }

        assert_eq!(Movement::from_token("MANUAL_ILERI"), Some(Movement::Forward));
        assert_eq!(Movement::from_token("manual_geri"), Some(Movement::Back));
        assert_eq!(Movement::from_token("Manuel_Sol"), Some(Movement::Left));
        assert_eq!(Movement::from_token("MANUAL_SAG"), Some(Movement::Right));

        assert_eq!(Movement::from_token("MANUEL_"), None);
        assert_eq!(Movement::from_token("MANUEL_YUKARI"), None);
        assert_eq!(Movement::from_token("ILERI"), None);
        assert_eq!(Movement::from_token("MANUEL_ILERI_HIZLI"), None);
    }

    #[test]
    fn classify() {
        let vocabulary = Vocabulary::from(&CommandConfig {
            known: vec!["OTONOM_BASLAT".into()],
            unknown: UnknownCommands::Forward,
        });

        assert_eq!(
            vocabulary.classify(&command("MANUEL_SAG")),
            Classification::Movement(Movement::Right)
        );
        assert_eq!(
            vocabulary.classify(&command("OTONOM_BASLAT")),
            Classification::Known
        );
        assert_eq!(
            vocabulary.classify(&command("otonom_baslat")),
            Classification::Unknown
        );
        assert_eq!(vocabulary.classify(&command("DANS")), Classification::Unknown);
    }

    #[test]
    fn parse_trims() {
        assert_eq!(command("  MANUEL_SOL \n").as_str(), "MANUEL_SOL");
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(matches!(Command::parse(""), Err(Error::BadCommand(_))));
        assert!(matches!(Command::parse(" \t "), Err(Error::BadCommand(_))));
    }

    #[test]
    fn parse_rejects_embedded_newline() {
        let err = Command::parse("MANUEL_SOL\nMANUEL_SAG").unwrap_err();

        assert!(matches!(err, Error::BadCommand(_)));
    }

    #[test]
    fn results_serialize_kebab_case() {
        assert_eq!(
            serde_json::to_string(&DispatchResult::LinkUnavailable).unwrap(),
            "\"link-unavailable\""
        );
        assert_eq!(
            DispatchResult::LinkUnavailable.to_string(),
            "link-unavailable"
        );
        assert_eq!(
            serde_json::to_string(&DispatchResult::Forwarded).unwrap(),
            "\"forwarded\""
        );
    }
}
