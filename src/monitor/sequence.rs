use std::sync::atomic::{AtomicU16, Ordering};

/// Process-wide echo sequence numbers: 1, 2, .., 65535, 1, .. Never 0.
#[derive(Debug)]
pub struct SequenceAllocator {
    next: AtomicU16,
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Allocator whose first value is `first` (0 is treated as 1).
    pub fn starting_at(first: u16) -> Self {
        Self {
            next: AtomicU16::new(first.max(1)),
        }
    }

    /// Hand out the next sequence number.
    pub fn next(&self) -> u16 {
        let advance = |current: u16| Some(if current == u16::MAX { 1 } else { current + 1 });
        match self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, advance)
        {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_one() {
        let seq = SequenceAllocator::new();
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(SequenceAllocator::starting_at(0).next(), 1);
    }

    #[test]
    fn test_wraps_to_one_skipping_zero() {
        let seq = SequenceAllocator::starting_at(65534);
        assert_eq!(seq.next(), 65534);
        assert_eq!(seq.next(), 65535);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
    }

    #[test]
    fn test_full_cycle_has_no_duplicates() {
        let seq = SequenceAllocator::new();
        let values: HashSet<u16> = (0..65535).map(|_| seq.next()).collect();
        assert_eq!(values.len(), 65535);
        assert!(!values.contains(&0));
        assert_eq!(seq.next(), 1);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let seq = Arc::new(SequenceAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = seq.clone();
                std::thread::spawn(move || (0..1000).map(|_| seq.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(all.insert(value), "duplicate sequence {value}");
            }
        }
        assert_eq!(all.len(), 8000);
    }
}
