use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

//queue contents plus the newest item ever written (survives pops)
struct Slots<T>{
    items: VecDeque<(T, u64)>,
    latest: Option<(T, u64)>,
    write_epoch: u64,
}

//bounded FIFO with per-item epochs
//freshness biased: pushing into a full buffer discards the oldest item
pub struct RingBuffer<T>{
    slots: Mutex<Slots<T>>,
    published: Condvar,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T>{
    pub fn new(capacity: usize) -> Self{
        assert!(capacity > 0, "ring buffer capacity must be greater than 0");

        RingBuffer{
            slots: Mutex::new(Slots{
                items: VecDeque::with_capacity(capacity),
                latest: None,
                write_epoch: 0,
            }),
            published: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>>{
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    //push item, return the epoch assigned to it
    pub fn push(&self, item: T) -> u64{
        let epoch ={
            let mut slots = self.lock();
            if slots.items.len() == self.capacity{
                slots.items.pop_front();
            }
            slots.write_epoch += 1;
            let epoch = slots.write_epoch;
            slots.latest = Some((item.clone(), epoch));
            slots.items.push_back((item, epoch));
            epoch
        };
        self.published.notify_all();
        epoch
    }

    //pop the oldest item
    pub fn pop(&self) -> Option<T>{
        self.lock().items.pop_front().map(|(item, _)| item)
    }

    //newest queued item without consuming it
    pub fn peek_latest(&self) -> Option<(T, u64)>{
        self.lock().items.back().cloned()
    }

    //block until something newer than `epoch` is pushed
    //returns the newest item, or None once the timeout elapses
    pub fn wait_newer(&self, epoch: u64, timeout: Duration) -> Option<(T, u64)>{
        let deadline = Instant::now() + timeout;
        let mut slots = self.lock();
        loop{
            if slots.write_epoch > epoch{
                return slots.latest.clone();
            }
            let now = Instant::now();
            if now >= deadline{
                return None;
            }
            let (guard, _) = self.published
                .wait_timeout(slots, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slots = guard;
        }
    }

    pub fn latest_epoch(&self) -> u64{
        self.lock().write_epoch
    }

    pub fn len(&self) -> usize{
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool{
        self.lock().items.is_empty()
    }

    pub fn is_full(&self) -> bool{
        self.lock().items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize{
        self.capacity
    }
}
