//! Bounded tee
//!
//! Splits one iterator into two branches, each consumed by its own thread.
//! A branch that gets `capacity` items ahead of the other blocks until the
//! slower branch catches up. Dropping a branch releases the other one.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

struct TeeState<I: Iterator> {
    source: I,
    queues: [VecDeque<I::Item>; 2],
    alive: [bool; 2],
    done: bool,
}

struct Shared<I: Iterator> {
    state: Mutex<TeeState<I>>,
    changed: Condvar,
    capacity: usize,
}

impl<I: Iterator> Shared<I> {
    fn lock(&self) -> MutexGuard<'_, TeeState<I>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One branch of a [`tee`]
pub struct TeeBranch<I: Iterator> {
    shared: Arc<Shared<I>>,
    side: usize,
}

/// Split `iter` into two branches with at most `capacity` buffered items
/// between them (0 is treated as 1)
pub fn tee<I>(iter: I, capacity: usize) -> (TeeBranch<I>, TeeBranch<I>)
where
    I: Iterator,
    I::Item: Clone,
{
    let shared = Arc::new(Shared {
        state: Mutex::new(TeeState {
            source: iter,
            queues: [VecDeque::new(), VecDeque::new()],
            alive: [true, true],
            done: false,
        }),
        changed: Condvar::new(),
        capacity: capacity.max(1),
    });
    (
        TeeBranch {
            shared: Arc::clone(&shared),
            side: 0,
        },
        TeeBranch { shared, side: 1 },
    )
}

impl<I> Iterator for TeeBranch<I>
where
    I: Iterator,
    I::Item: Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let me = self.side;
        let other = 1 - me;
        let mut state = self.shared.lock();
        loop {
            if let Some(item) = state.queues[me].pop_front() {
                self.shared.changed.notify_all();
                return Some(item);
            }
            if state.done {
                return None;
            }
            if state.alive[other] && state.queues[other].len() >= self.shared.capacity {
                state = self
                    .shared
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }
            let Some(item) = state.source.next() else {
                state.done = true;
                self.shared.changed.notify_all();
                return None;
            };
            if state.alive[other] {
                state.queues[other].push_back(item.clone());
                self.shared.changed.notify_all();
            }
            return Some(item);
        }
    }
}

impl<I: Iterator> Drop for TeeBranch<I> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.alive[self.side] = false;
        state.queues[self.side].clear();
        self.shared.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_both_branches_see_everything() {
        let (a, b) = tee(0..100, 4);
        let left = thread::spawn(move || a.collect::<Vec<_>>());
        let right = thread::spawn(move || b.collect::<Vec<_>>());
        let expected: Vec<i32> = (0..100).collect();
        assert_eq!(left.join().unwrap(), expected);
        assert_eq!(right.join().unwrap(), expected);
    }

    #[test]
    fn test_fast_branch_blocks_at_capacity() {
        let (a, b) = tee(0..10, 3);
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let fast = thread::spawn(move || {
            for _ in a {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pulled.load(Ordering::SeqCst), 3);

        drop(b);
        fast.join().unwrap();
        assert_eq!(pulled.load(Ordering::SeqCst), 10);
    }
}
