//! Cooperative cancellation.
//!
//! Ctrl-C only sets a flag. The upgrade loop checks it between packages and
//! before starting a swap; rollback never checks it, so a restore that has
//! begun always finishes.

use crate::error::{DecantError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            Err(DecantError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Route Ctrl-C to this flag for the rest of the process
    pub fn install_ctrl_c_handler(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after the current step");
                flag.trigger();
            }
        });
    }
}
