#![deny(missing_docs)]

//! Bridges a web control surface to a vehicle controller on a serial port.
//!
//! Commands from the control surface are classified and forwarded to the controller.
//! Manual movement commands only get through while manual control is enabled,
//! and every new control session disables it again.
//!
//! A barcode scanner on a second serial port is drained in the background.
//! Asking for the latest barcode also passes it on to the controller.
//!
//! Both serial devices may come and go, see [`reconnect`].

/// Request and response payloads of the HTTP interface.
pub mod actions;

/// Code relating to setting up the HTTP server.
pub mod server;

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;

/// Serial port message types, codecs and errors.
pub mod serial;

/// Devices, and how to open them.
/// Either real serial ports or mocks.
pub mod endpoint;

/// Link states, and the bounded backoff used to (re)open a device.
pub mod reconnect;

/// The link to the vehicle controller.
pub mod link;

/// The barcode scanner, and the latest reading it produced.
pub mod scanner;

/// The manual control gate.
pub mod gate;

/// Control sessions.
pub mod session;

/// Command classification, and deciding what reaches the controller.
pub mod dispatch;

/// Everything wired together, as handed to the HTTP handlers.
pub mod gateway;
