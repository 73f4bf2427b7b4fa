/// An object paired with the number of outstanding users.
///
/// The count is only mutated while the owning registry's lock is held; the registry
/// discards the entry once the count returns to zero.
#[derive(Debug)]
pub struct ReferenceCounted<T> {
    object: T,
    ref_count: usize,
}

impl<T> ReferenceCounted<T> {
    pub fn new(object: T) -> Self {
        Self {
            object,
            ref_count: 0,
        }
    }

    pub fn object(&self) -> &T {
        &self.object
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Increments the count and returns the new value.
    pub fn increment(&mut self) -> usize {
        self.ref_count += 1;
        self.ref_count
    }

    /// Decrements the count and returns the new value.
    ///
    /// # Panics
    ///
    /// Panics when the count is already zero.
    pub fn decrement(&mut self) -> usize {
        assert!(
            self.ref_count > 0,
            "ReferenceCounted::decrement() called with ref_count == 0"
        );
        self.ref_count -= 1;
        self.ref_count
    }

    pub fn into_object(self) -> T {
        self.object
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_up_and_down() {
        let mut counted = ReferenceCounted::new("live-query");
        assert_eq!(counted.ref_count(), 0);
        assert_eq!(counted.increment(), 1);
        assert_eq!(counted.increment(), 2);
        assert_eq!(counted.decrement(), 1);
        assert_eq!(counted.decrement(), 0);
        assert_eq!(counted.into_object(), "live-query");
    }

    #[test]
    #[should_panic(expected = "ref_count == 0")]
    fn decrement_below_zero_panics() {
        let mut counted = ReferenceCounted::new(());
        counted.decrement();
    }
}
