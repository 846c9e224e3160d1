use std::collections::VecDeque;

use crate::protocol::Breadcrumb;

/// Fixed-capacity breadcrumb trail. Pushing into a full buffer evicts the oldest entry.
#[derive(Debug, Clone, Default)]
pub struct BreadcrumbBuffer {
    buf: VecDeque<Breadcrumb>,
    capacity: usize,
}

impl BreadcrumbBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, breadcrumb: Breadcrumb) {
        if self.capacity == 0 {
            return;
        }
        while self.buf.len() >= self.capacity {
            let _ = self.buf.pop_front();
        }
        self.buf.push_back(breadcrumb);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breadcrumb> {
        self.buf.iter()
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<Breadcrumb> {
        self.buf.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
