//! Priority queue: tiered, FIFO within a tier.

use std::collections::VecDeque;

use crate::domain::Priority;

pub trait Prioritized {
    fn priority(&self) -> Priority;
}

/// Higher tiers dequeue first; within a tier, insertion order is kept.
///
/// `enqueue` scans for the first element with a strictly lower priority and
/// inserts just before it, which keeps ties stable.
#[derive(Debug, Clone)]
pub struct PriorityQueue<T> {
    items: VecDeque<T>,
}

impl<T: Prioritized> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, item: T) {
        let priority = item.priority();
        let index = self
            .items
            .iter()
            .position(|queued| queued.priority() < priority)
            .unwrap_or(self.items.len());
        self.items.insert(index, item);
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        self.items.remove(index)
    }

    /// Remove and return every item matching `pred`, in queue order.
    pub fn drain_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if pred(&item) {
                removed.push(item);
            } else {
                kept.push_back(item);
            }
        }
        self.items = kept;
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Prioritized> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item(&'static str, Priority);

    impl Prioritized for Item {
        fn priority(&self) -> Priority {
            self.1
        }
    }

    fn drain(q: &mut PriorityQueue<Item>) -> Vec<&'static str> {
        std::iter::from_fn(|| q.dequeue().map(|i| i.0)).collect()
    }

    #[rstest]
    #[case(
        vec![("a", Priority::Low), ("b", Priority::Normal), ("c", Priority::High), ("d", Priority::Low)],
        vec!["c", "b", "a", "d"],
    )]
    #[case(
        vec![("a", Priority::High), ("b", Priority::High), ("c", Priority::High)],
        vec!["a", "b", "c"],
    )]
    #[case(
        vec![("a", Priority::Normal), ("b", Priority::Low), ("c", Priority::Normal), ("d", Priority::High)],
        vec!["d", "a", "c", "b"],
    )]
    fn dispatch_order(
        #[case] input: Vec<(&'static str, Priority)>,
        #[case] expected: Vec<&'static str>,
    ) {
        let mut q = PriorityQueue::new();
        for (name, priority) in input {
            q.enqueue(Item(name, priority));
        }
        assert_eq!(drain(&mut q), expected);
    }

    #[test]
    fn requeued_high_preempts_waiting_work() {
        let mut q = PriorityQueue::new();
        q.enqueue(Item("fresh-normal", Priority::Normal));
        q.enqueue(Item("fresh-low", Priority::Low));
        q.enqueue(Item("retry", Priority::High));
        assert_eq!(q.peek().map(|i| i.0), Some("retry"));
    }

    #[test]
    fn drain_where_keeps_order_of_the_rest() {
        let mut q = PriorityQueue::new();
        q.enqueue(Item("a", Priority::Normal));
        q.enqueue(Item("b", Priority::Normal));
        q.enqueue(Item("c", Priority::Normal));

        let removed = q.drain_where(|i| i.0 == "b");
        assert_eq!(removed, vec![Item("b", Priority::Normal)]);
        assert_eq!(drain(&mut q), vec!["a", "c"]);
        assert!(q.dequeue().is_none());
    }
}
