use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Whether manual movement commands may reach the controller.
///
/// Clones share the same flag.
/// Starts out disabled.
#[derive(Debug, Clone, Default)]
pub struct CommandGate(Arc<AtomicBool>);

impl CommandGate {
    /// Enable or disable manual control.
    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }

    /// Is manual control enabled?
    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Disable manual control.
    pub fn reset(&self) {
        self.set(false);
    }
}
