//! Thread-local executor id for affinity-aware routing.
//!
//! Executor threads set their index once at startup. Any other thread (the
//! runner, test threads) sees `None`, which sends pool lookups down the
//! work-stealing path.

use std::cell::Cell;

/// Sentinel value indicating no executor id is set.
const NO_EXECUTOR: usize = usize::MAX;

thread_local! {
    static EXECUTOR_ID: Cell<usize> = const { Cell::new(NO_EXECUTOR) };
}

/// Set the executor id for the current thread.
///
/// Executors call this with `Some(id)` before running tasks and with `None`
/// when they stop.
#[inline]
pub fn set_current_executor_id(id: Option<usize>) {
    EXECUTOR_ID.with(|c| c.set(id.unwrap_or(NO_EXECUTOR)));
}

/// Executor id of the current thread, if it is an executor thread.
#[inline]
pub fn current_executor_id() -> Option<usize> {
    EXECUTOR_ID.with(|c| {
        let v = c.get();
        if v == NO_EXECUTOR {
            None
        } else {
            Some(v)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_default_is_none() {
        thread::spawn(|| assert_eq!(current_executor_id(), None))
            .join()
            .expect("thread panicked");
    }

    #[test]
    fn test_set_and_clear() {
        thread::spawn(|| {
            set_current_executor_id(Some(3));
            assert_eq!(current_executor_id(), Some(3));
            set_current_executor_id(None);
            assert_eq!(current_executor_id(), None);
        })
        .join()
        .expect("thread panicked");
    }

    #[test]
    fn test_isolated_between_threads() {
        set_current_executor_id(Some(1));
        thread::spawn(|| assert_eq!(current_executor_id(), None))
            .join()
            .expect("thread panicked");
        assert_eq!(current_executor_id(), Some(1));
        set_current_executor_id(None);
    }
}
