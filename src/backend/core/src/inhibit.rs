//! Suspend inhibition while a watch is running.
//!
//! One `SuspendInhibitor` is shared as an `Arc` by everything that may want
//! to keep the machine awake. Each holder takes an [`InhibitGuard`]; the
//! inhibitor is active while at least one guard is alive, and tells its
//! [`PowerHook`] each time that aggregate state flips.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Whatever actually talks to the power manager.
///
/// Called with the inhibitor's lock held, so calls arrive in order. It must
/// not acquire or drop guards itself.
pub trait PowerHook: Send + Sync {
    fn set_inhibited(&self, inhibited: bool);
}

/// Hook that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPowerHook;

impl PowerHook for LogPowerHook {
    fn set_inhibited(&self, inhibited: bool) {
        info!(inhibited = inhibited, "Suspend inhibition changed");
    }
}

pub struct SuspendInhibitor {
    holders: Mutex<usize>,
    hook: Box<dyn PowerHook>,
}

impl SuspendInhibitor {
    pub fn new(hook: impl PowerHook + 'static) -> Arc<Self> {
        Arc::new(Self {
            holders: Mutex::new(0),
            hook: Box::new(hook),
        })
    }

    /// Take a reference. Released when the guard drops.
    pub fn acquire(self: &Arc<Self>) -> InhibitGuard {
        let mut holders = self.holders.lock();
        *holders += 1;
        if *holders == 1 {
            self.hook.set_inhibited(true);
        }
        InhibitGuard {
            inhibitor: self.clone(),
        }
    }

    fn release(&self) {
        let mut holders = self.holders.lock();
        *holders = holders.saturating_sub(1);
        if *holders == 0 {
            self.hook.set_inhibited(false);
        }
    }

    pub fn is_active(&self) -> bool {
        *self.holders.lock() > 0
    }

    pub fn holders(&self) -> usize {
        *self.holders.lock()
    }
}

impl Default for SuspendInhibitor {
    fn default() -> Self {
        Self {
            holders: Mutex::new(0),
            hook: Box::new(LogPowerHook),
        }
    }
}

impl fmt::Debug for SuspendInhibitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendInhibitor")
            .field("holders", &self.holders())
            .finish()
    }
}

/// One reference on a [`SuspendInhibitor`].
#[must_use = "inhibition ends when the guard is dropped"]
pub struct InhibitGuard {
    inhibitor: Arc<SuspendInhibitor>,
}

impl Drop for InhibitGuard {
    fn drop(&mut self) {
        self.inhibitor.release();
    }
}

impl fmt::Debug for InhibitGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InhibitGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<bool>>>);

    impl PowerHook for Recorder {
        fn set_inhibited(&self, inhibited: bool) {
            self.0.lock().push(inhibited);
        }
    }

    #[test]
    fn test_flips_only_on_first_and_last() {
        let hook = Recorder::default();
        let inhibitor = SuspendInhibitor::new(hook.clone());

        let a = inhibitor.acquire();
        let b = inhibitor.acquire();
        assert!(inhibitor.is_active());
        assert_eq!(inhibitor.holders(), 2);

        drop(a);
        assert!(inhibitor.is_active());
        drop(b);
        assert!(!inhibitor.is_active());

        assert_eq!(*hook.0.lock(), vec![true, false]);
    }

    #[test]
    fn test_reacquire_after_release() {
        let hook = Recorder::default();
        let inhibitor = SuspendInhibitor::new(hook.clone());
        drop(inhibitor.acquire());
        let _g = inhibitor.acquire();
        assert_eq!(*hook.0.lock(), vec![true, false, true]);
    }
}
