use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-instance, non-reentrant run guard shared by the scheduled and
/// on-demand paths.
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

/// Proof of holding the guard; releases it when dropped.
#[derive(Debug)]
pub struct RunPermit {
    running: Arc<AtomicBool>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<RunPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                running: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_permit_drops() {
        let guard = RunGuard::new();
        let permit = guard.try_acquire().expect("idle guard");
        assert!(guard.is_running());
        assert!(guard.clone().try_acquire().is_none());
        drop(permit);
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn panic_while_holding_releases_guard() {
        let guard = RunGuard::new();
        let inner = guard.clone();
        let result = std::panic::catch_unwind(move || {
            let _permit = inner.try_acquire().expect("idle guard");
            panic!("run blew up");
        });
        assert!(result.is_err());
        assert!(!guard.is_running());
    }
}
