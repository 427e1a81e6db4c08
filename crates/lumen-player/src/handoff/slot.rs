use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Counters kept under the slot lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    /// Items handed to `publish`.
    pub published: u64,
    /// Items replaced before anyone took them.
    pub overwritten: u64,
    /// Items taken by the subscriber.
    pub consumed: u64,
}

/// An item moved out of the slot together with its sequence number.
#[derive(Debug)]
pub struct Taken<T> {
    pub seq: u64,
    pub item: T,
}

struct State<T> {
    item: Option<T>,
    seq: u64,
    ready: bool,
    closed: bool,
    subscribed: bool,
    stats: SlotStats,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// Writing half. Dropping it closes the slot.
pub struct Publisher<T> {
    shared: Arc<Shared<T>>,
}

/// Reading half.
pub struct Subscriber<T> {
    shared: Arc<Shared<T>>,
}

/// Create a capacity-1 channel that overwrites on full.
pub fn slot<T>() -> (Publisher<T>, Subscriber<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            item: None,
            seq: 0,
            ready: false,
            closed: false,
            subscribed: true,
            stats: SlotStats::default(),
        }),
        ready: Condvar::new(),
    });
    (
        Publisher {
            shared: shared.clone(),
        },
        Subscriber { shared },
    )
}

impl<T> Publisher<T> {
    /// Replace whatever is buffered with `item`. Returns the new sequence number.
    pub fn publish(&self, item: T) -> u64 {
        self.publish_with(|_| item)
    }

    /// Like `publish`, but builds the item from its sequence number.
    /// `make` runs under the slot lock and must stay cheap.
    pub fn publish_with(&self, make: impl FnOnce(u64) -> T) -> u64 {
        let mut state = self.shared.state.lock();
        state.seq += 1;
        let seq = state.seq;

        let was_ready = state.ready;
        if was_ready {
            state.stats.overwritten += 1;
        }
        state.item = Some(make(seq));
        state.ready = true;
        state.stats.published += 1;
        drop(state);

        // Only a false -> true transition wakes the subscriber.
        if !was_ready {
            self.shared.ready.notify_one();
        }
        seq
    }

    /// False once the subscriber has been dropped.
    pub fn has_subscriber(&self) -> bool {
        self.shared.state.lock().subscribed
    }
}

impl<T> Drop for Publisher<T> {
    fn drop(&mut self) {
        self.shared.state.lock().closed = true;
        self.shared.ready.notify_all();
    }
}

impl<T> Subscriber<T> {
    /// Take the buffered item if there is one. Mutates nothing otherwise.
    pub fn try_take(&self) -> Option<Taken<T>> {
        take_locked(&mut self.shared.state.lock())
    }

    /// Wait at most `timeout` for an item. A timeout or a closed slot
    /// both mean "nothing new" and return `None`.
    pub fn take_timeout(&self, timeout: Duration) -> Option<Taken<T>> {
        if timeout.is_zero() {
            return self.try_take();
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.ready && !state.closed {
            if self
                .shared
                .ready
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        take_locked(&mut state)
    }

    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().ready
    }

    /// True once the publisher is gone. A buffered item can still be taken.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Sequence number of the most recent publish (0 if none).
    pub fn last_seq(&self) -> u64 {
        self.shared.state.lock().seq
    }

    pub fn stats(&self) -> SlotStats {
        self.shared.state.lock().stats
    }
}

impl<T> Drop for Subscriber<T> {
    fn drop(&mut self) {
        self.shared.state.lock().subscribed = false;
    }
}

fn take_locked<T>(state: &mut State<T>) -> Option<Taken<T>> {
    if !state.ready {
        return None;
    }
    state.ready = false;
    let item = state.item.take()?;
    state.stats.consumed += 1;
    Some(Taken {
        seq: state.seq,
        item,
    })
}
