use std::fmt;
use std::sync::Arc;

/// Single-pass iterator over a snapshot of an observer's proxies.
///
/// The snapshot is taken when the iterator is created; later cache changes
/// are not visible through it. An exhausted iterator compares equal to
/// [`ObserverIter::end`].
pub struct ObserverIter<T> {
    items: Arc<[Arc<T>]>,
    pos: usize,
}

impl<T> ObserverIter<T> {
    pub(crate) fn new(items: Arc<[Arc<T>]>) -> Self {
        Self { items, pos: 0 }
    }

    /// The end sentinel.
    pub fn end() -> Self {
        Self {
            items: Arc::from(Vec::new()),
            pos: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.pos >= self.items.len()
    }

    /// The element the iterator points at, without advancing.
    pub fn current(&self) -> Option<&Arc<T>> {
        self.items.get(self.pos)
    }
}

impl<T> Iterator for ObserverIter<T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Arc<T>> {
        let item = self.items.get(self.pos)?.clone();
        self.pos += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.items.len().saturating_sub(self.pos);
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for ObserverIter<T> {}

impl<T> PartialEq for ObserverIter<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.is_end(), other.is_end()) {
            (true, true) => true,
            (false, false) => Arc::ptr_eq(&self.items, &other.items) && self.pos == other.pos,
            _ => false,
        }
    }
}

impl<T> fmt::Debug for ObserverIter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverIter")
            .field("pos", &self.pos)
            .field("len", &self.items.len())
            .finish()
    }
}
