//! Component lifecycle guards
//!
//! Every store checks its [`Lifecycle`] before talking to the database:
//! reads fail once the caller's token is cancelled, writes additionally
//! fail once the component has been closed.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::storage::{StoreError, StoreResult};

#[derive(Debug)]
pub struct Lifecycle {
    component: &'static str,
    closed: AtomicBool,
}

impl Lifecycle {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            closed: AtomicBool::new(false),
        }
    }

    pub fn check_read(&self, cancel: &CancellationToken) -> StoreResult<()> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }

    pub fn check_write(&self, cancel: &CancellationToken) -> StoreResult<()> {
        self.check_read(cancel)?;
        if self.is_closed() {
            return Err(StoreError::Disposed {
                component: self.component,
            });
        }
        Ok(())
    }

    /// Stop accepting writes. Returns `true` on the first call only.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            debug!(component = self.component, "Closed");
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
