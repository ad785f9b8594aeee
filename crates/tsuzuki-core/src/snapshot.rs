use std::sync::{Arc, PoisonError, RwLock};

/// A shared value that is only ever replaced whole.
///
/// Readers take an `Arc` and keep it for as long as they need a consistent
/// view; a concurrent [`Snapshot::replace`] never changes what they see.
#[derive(Debug, Default)]
pub struct Snapshot<T> {
    current: RwLock<Arc<T>>,
}

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    /// The current value.
    pub fn load(&self) -> Arc<T> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a new value. Earlier `load` results are unaffected.
    pub fn replace(&self, value: T) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_keeps_old_readers() {
        let snapshot = Snapshot::new(vec![1, 2, 3]);
        let before = snapshot.load();
        snapshot.replace(vec![4]);
        assert_eq!(*before, [1, 2, 3]);
        assert_eq!(*snapshot.load(), [4]);
    }

    #[test]
    fn test_shared_across_threads() {
        let snapshot = Arc::new(Snapshot::new(0u32));
        let writer = {
            let snapshot = Arc::clone(&snapshot);
            std::thread::spawn(move || {
                for i in 1..=100 {
                    snapshot.replace(i);
                }
            })
        };
        for _ in 0..100 {
            let seen = *snapshot.load();
            assert!(seen <= 100);
        }
        writer.join().unwrap();
        assert_eq!(*snapshot.load(), 100);
    }
}
