use std::sync::Arc;
use std::time::Duration;
use crate::ring_buffer::RingBuffer;
use super::message::Message;

pub struct Topic<T: Message>{
    name: String,
    buffer: Arc<RingBuffer<T>>
}

impl<T: Message> Topic<T>{
    pub fn new(name: &str, capacity: usize) -> Self{
        Topic{
            name: name.to_string(),
            buffer: Arc::new(RingBuffer::new(capacity)),
        }
    }

    pub fn name(&self) -> &str{
        &self.name
    }

    pub fn publish(&self, msg: T) -> u64{
        self.buffer.push(msg)
    }

    pub fn try_receive(&self) -> Option<T>{
        self.buffer.pop()
    }

    pub fn peek_latest(&self) -> Option<(T, u64)>{
        self.buffer.peek_latest()
    }

    //newest message with an epoch above `epoch`, waiting up to `timeout` for one
    pub fn wait_newer(&self, epoch: u64, timeout: Duration) -> Option<(T, u64)>{
        self.buffer.wait_newer(epoch, timeout)
    }

    pub fn latest_epoch(&self) -> u64{
        self.buffer.latest_epoch()
    }

    pub fn len(&self) -> usize{
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool{
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize{
        self.buffer.capacity()
    }
}

impl<T: Message> Clone for Topic<T>{
    fn clone(&self) -> Self{
        Topic{
            name: self.name.clone(),
            buffer: Arc::clone(&self.buffer),
        }
    }
}
