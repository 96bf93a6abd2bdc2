//! Work-group barrier
//!
//! Unlike `std::sync::Barrier`, the participant count shrinks as work-items
//! finish, and a failing work-item can abort the group so that its peers
//! stop waiting instead of deadlocking.

use parking_lot::{Condvar, Mutex};

/// The group was aborted while waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

#[derive(Debug)]
struct State {
    active: usize,
    waiting: usize,
    generation: u64,
    aborted: bool,
}

#[derive(Debug)]
pub struct GroupBarrier {
    state: Mutex<State>,
    cvar: Condvar,
}

impl GroupBarrier {
    pub fn new(participants: usize) -> Self {
        Self {
            state: Mutex::new(State {
                active: participants,
                waiting: 0,
                generation: 0,
                aborted: false,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Block until every active work-item has arrived
    pub fn wait(&self) -> Result<(), Aborted> {
        let mut state = self.state.lock();
        if state.aborted {
            return Err(Aborted);
        }
        state.waiting += 1;
        if state.waiting >= state.active {
            self.release(&mut state);
            return Ok(());
        }

        let generation = state.generation;
        while state.generation == generation && !state.aborted {
            self.cvar.wait(&mut state);
        }
        if state.generation == generation {
            Err(Aborted)
        } else {
            Ok(())
        }
    }

    /// A work-item finished; it no longer participates
    pub fn leave(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        if state.waiting > 0 && state.waiting >= state.active {
            self.release(&mut state);
        }
    }

    /// Wake every waiter with an error
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        self.cvar.notify_all();
    }

    fn release(&self, state: &mut State) {
        state.waiting = 0;
        state.generation += 1;
        self.cvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_all_arrive_before_any_leaves() {
        let barrier = GroupBarrier::new(4);
        let before = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    before.fetch_add(1, Ordering::SeqCst);
                    barrier.wait().unwrap();
                    assert_eq!(before.load(Ordering::SeqCst), 4);
                    barrier.leave();
                });
            }
        });
    }

    #[test]
    fn test_abort_releases_waiters() {
        let barrier = GroupBarrier::new(2);
        std::thread::scope(|s| {
            let waiter = s.spawn(|| barrier.wait());
            std::thread::sleep(std::time::Duration::from_millis(10));
            barrier.abort();
            assert_eq!(waiter.join().unwrap(), Err(Aborted));
        });
    }

    #[test]
    fn test_leaving_item_releases_remaining() {
        let barrier = GroupBarrier::new(2);
        std::thread::scope(|s| {
            let waiter = s.spawn(|| barrier.wait());
            barrier.leave();
            assert_eq!(waiter.join().unwrap(), Ok(()));
        });
    }
}
