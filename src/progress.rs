// src/progress.rs
use std::sync::RwLock;

/// Requests issued versus requests expected for the current run.
///
/// Each counter sits behind its own lock so a reporting task can read either one at any
/// time without coordinating with the workers. `expected` is an estimate for display only.
#[derive(Debug, Default)]
pub struct Progress {
    issued: RwLock<u64>,
    expected: RwLock<u64>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_issued(&self) {
        let mut issued = self.issued.write().unwrap_or_else(|e| e.into_inner());
        *issued += 1;
    }

    pub fn issued(&self) -> u64 {
        *self.issued.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_expected(&self, value: u64) {
        *self.expected.write().unwrap_or_else(|e| e.into_inner()) = value;
    }

    pub fn expected(&self) -> u64 {
        *self.expected.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_increments() {
        let progress = Arc::new(Progress::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let progress = progress.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    progress.increment_issued();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(progress.issued(), 8000);
    }

    #[test]
    fn test_expected_is_independent() {
        let progress = Progress::new();
        progress.set_expected(10);
        progress.set_expected(15);
        progress.increment_issued();
        assert_eq!(progress.expected(), 15);
        assert_eq!(progress.issued(), 1);
    }
}
