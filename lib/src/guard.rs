//! # Exit-path cleanup
//!
//! Acquiring a resource that must not outlive the process (a mount, a frozen
//! filesystem) registers a release action with an [`ExitGuard`] and hands
//! back a [`ReleaseHandle`]. The happy path releases explicitly through the
//! handle; whatever is still outstanding when the guard is drained or
//! dropped is released then, in registration order. Each action runs at
//! most once, and a failing action does not prevent the rest from running.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};

type Action<'r> = Box<dyn FnOnce() -> Result<()> + 'r>;

struct Entry<'r> {
    description: String,
    action: RefCell<Option<Action<'r>>>,
}

/// Releases one registered resource; a no-op once released.
#[derive(Clone)]
pub(crate) struct ReleaseHandle<'r>(Rc<Entry<'r>>);

impl std::fmt::Debug for ReleaseHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseHandle")
            .field("description", &self.0.description)
            .field("released", &self.is_released())
            .finish()
    }
}

impl ReleaseHandle<'_> {
    pub(crate) fn release(&self) -> Result<()> {
        // Take the action out before invoking it, so a reentrant or repeated
        // release observes the marker.
        let action = self.0.action.borrow_mut().take();
        match action {
            Some(f) => {
                tracing::debug!("Releasing: {}", self.0.description);
                f().with_context(|| format!("Releasing: {}", self.0.description))
            }
            None => {
                tracing::trace!("Already released: {}", self.0.description);
                Ok(())
            }
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.0.action.borrow().is_none()
    }
}

#[derive(Default)]
pub(crate) struct ExitGuard<'r> {
    entries: RefCell<Vec<ReleaseHandle<'r>>>,
}

impl std::fmt::Debug for ExitGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.borrow().iter()).finish()
    }
}

impl<'r> ExitGuard<'r> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        description: impl Into<String>,
        action: impl FnOnce() -> Result<()> + 'r,
    ) -> ReleaseHandle<'r> {
        let h = ReleaseHandle(Rc::new(Entry {
            description: description.into(),
            action: RefCell::new(Some(Box::new(action))),
        }));
        self.entries.borrow_mut().push(h.clone());
        h
    }

    /// Number of registered actions not yet released.
    pub(crate) fn outstanding(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|h| !h.is_released())
            .count()
    }

    /// Release everything still outstanding, in registration order.
    /// Returns the number of actions that failed.
    pub(crate) fn drain(&self) -> usize {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        let mut failed = 0;
        for h in entries.iter().filter(|h| !h.is_released()) {
            crate::status::warning(format!("Cleaning up: {}", h.0.description));
            if let Err(e) = h.release() {
                failed += 1;
                crate::status::error(format!("{e:#}"));
            }
        }
        failed
    }
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let failed = self.drain();
        if failed > 0 {
            tracing::warn!("{failed} cleanup action(s) failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_release_once() -> Result<()> {
        let count = Cell::new(0);
        let guard = ExitGuard::new();
        let h = guard.register("unmount /esp", || {
            count.set(count.get() + 1);
            Ok(())
        });
        assert_eq!(guard.outstanding(), 1);
        h.release()?;
        h.release()?;
        assert!(h.is_released());
        assert_eq!(guard.outstanding(), 0);
        assert_eq!(guard.drain(), 0);
        drop(guard);
        assert_eq!(count.get(), 1);
        Ok(())
    }

    #[test]
    fn test_drain_order_and_fault_tolerance() {
        let order = RefCell::new(Vec::new());
        {
            let guard = ExitGuard::new();
            let _a = guard.register("first", || {
                order.borrow_mut().push("first");
                Ok(())
            });
            let _b = guard.register("second", || {
                order.borrow_mut().push("second");
                anyhow::bail!("device busy")
            });
            let c = guard.register("third", || {
                order.borrow_mut().push("third");
                Ok(())
            });
            let _d = guard.register("fourth", || {
                order.borrow_mut().push("fourth");
                Ok(())
            });
            c.release().unwrap();
            // Dropped here without explicit drain
        }
        assert_eq!(*order.borrow(), ["third", "first", "second", "fourth"]);
    }

    #[test]
    fn test_explicit_drain_then_drop() {
        let count = Cell::new(0);
        let guard = ExitGuard::new();
        let h = guard.register("thaw /", || {
            count.set(count.get() + 1);
            anyhow::bail!("not frozen")
        });
        assert_eq!(guard.drain(), 1);
        assert!(h.is_released());
        // The failed action is not retried
        assert!(h.release().is_ok());
        drop(guard);
        assert_eq!(count.get(), 1);
    }
}
