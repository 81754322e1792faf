use std::sync::atomic::{AtomicUsize, Ordering};

const CLOSED: usize = 1 << (usize::BITS - 1);

/// State of a phase's active-session counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveState {
    /// Sessions may still start; this many are active.
    Open(usize),
    /// The count reached zero after the phase finished; no session can start.
    Closed,
}

/// Active-session counter that can be closed exactly once, when empty.
///
/// Count and closed flag share one atomic word so that "no session is active"
/// and "no session is about to start" are decided by a single exchange.
#[derive(Debug, Default)]
pub(crate) struct ActiveSessions(AtomicUsize);

impl ActiveSessions {
    /// Count one more session, unless the counter is closed.
    pub(crate) fn try_increment(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                (v & CLOSED == 0).then_some(v + 1)
            })
            .is_ok()
    }

    /// Count one session less; returns how many remain.
    pub(crate) fn decrement(&self) -> usize {
        let previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                let count = v & !CLOSED;
                if count == 0 {
                    None
                } else {
                    Some(v - 1)
                }
            });
        match previous {
            Ok(v) => (v & !CLOSED) - 1,
            Err(_) => {
                tracing::warn!("Active session counter decremented below zero");
                0
            }
        }
    }

    /// Close the counter if it is zero. Succeeds at most once.
    pub(crate) fn try_close(&self) -> bool {
        self.0
            .compare_exchange(0, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn state(&self) -> ActiveState {
        let v = self.0.load(Ordering::Acquire);
        if v & CLOSED != 0 {
            ActiveState::Closed
        } else {
            ActiveState::Open(v)
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::Acquire) & !CLOSED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_only_when_empty() {
        let active = ActiveSessions::default();
        assert!(active.try_increment());
        assert!(!active.try_close());
        assert_eq!(active.decrement(), 0);
        assert!(active.try_close());
        assert!(!active.try_close());
        assert_eq!(active.state(), ActiveState::Closed);
    }

    #[test]
    fn test_closed_refuses_increments() {
        let active = ActiveSessions::default();
        assert!(active.try_close());
        assert!(!active.try_increment());
        assert_eq!(active.count(), 0);
    }

    #[test]
    fn test_counts() {
        let active = ActiveSessions::default();
        for _ in 0..3 {
            assert!(active.try_increment());
        }
        assert_eq!(active.state(), ActiveState::Open(3));
        assert_eq!(active.decrement(), 2);
        assert_eq!(active.count(), 2);
    }

    #[test]
    fn test_underflow_is_ignored() {
        let active = ActiveSessions::default();
        assert_eq!(active.decrement(), 0);
        assert_eq!(active.state(), ActiveState::Open(0));
    }
}
