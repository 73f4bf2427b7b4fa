use std::sync::atomic::{AtomicI64, Ordering};

static NEXT_SEQUENCE_NUMBER: AtomicI64 = AtomicI64::new(1);

/// Draws the next number from the process-wide sequence counter.
///
/// The counter is shared by every query, so numbers are unique and totally ordered across
/// the process but are not contiguous for any single query.
pub fn next_sequence_number() -> i64 {
    NEXT_SEQUENCE_NUMBER.fetch_add(1, Ordering::SeqCst)
}

/// A value tagged with the sequence number that was current when it was produced.
#[derive(Clone, Debug, PartialEq)]
pub struct SequencedReference<T> {
    pub sequence_number: i64,
    pub value: T,
}

impl<T> SequencedReference<T> {
    pub fn new(sequence_number: i64, value: T) -> Self {
        Self {
            sequence_number,
            value,
        }
    }

    /// Tags `value` with a freshly drawn sequence number.
    pub fn next(value: T) -> Self {
        Self::new(next_sequence_number(), value)
    }

    pub fn is_newer_than(&self, other: &SequencedReference<T>) -> bool {
        self.sequence_number > other.sequence_number
    }

    /// Transforms the value, keeping the sequence number.
    pub fn map<U, F>(self, f: F) -> SequencedReference<U>
    where
        F: FnOnce(T) -> U,
    {
        SequencedReference {
            sequence_number: self.sequence_number,
            value: f(self.value),
        }
    }

    pub fn as_ref(&self) -> SequencedReference<&T> {
        SequencedReference {
            sequence_number: self.sequence_number,
            value: &self.value,
        }
    }
}
