//! Bounded Actor Queue Implementation

use crate::{Message, QueueError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default queue capacity
pub const DEFAULT_CAPACITY: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reply slot for one synchronous message kind
struct ReplySlot<R> {
    /// Held by the caller for the whole call, serializes same-kind callers
    call: Mutex<()>,
    /// Result written by the owning actor
    result: Mutex<Option<R>>,
    /// Signalled when `result` is set
    ready: Condvar,
}

impl<R> ReplySlot<R> {
    fn new() -> Self {
        Self {
            call: Mutex::new(()),
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

/// Builder for an [`ActorQueue`]
pub struct QueueBuilder<M: Message, R> {
    name: String,
    capacity: usize,
    reply_kinds: Vec<M::Kind>,
    uncapped_kinds: Vec<M::Kind>,
    _marker: PhantomData<fn() -> (M, R)>,
}

impl<M: Message, R> QueueBuilder<M, R> {
    /// Set the queue capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Declare a message kind as synchronous
    pub fn reply_kind(mut self, kind: M::Kind) -> Self {
        self.reply_kinds.push(kind);
        self
    }

    /// Declare several message kinds as synchronous
    pub fn reply_kinds(mut self, kinds: impl IntoIterator<Item = M::Kind>) -> Self {
        self.reply_kinds.extend(kinds);
        self
    }

    /// Accept messages of `kind` even when the queue is full.
    ///
    /// Meant for messages handing back a finite resource, whose number in
    /// flight is already bounded by that resource.
    pub fn uncapped_kinds(mut self, kinds: impl IntoIterator<Item = M::Kind>) -> Self {
        self.uncapped_kinds.extend(kinds);
        self
    }

    /// Build the queue
    pub fn build(self) -> ActorQueue<M, R> {
        let replies = self
            .reply_kinds
            .into_iter()
            .map(|kind| (kind, ReplySlot::new()))
            .collect();

        ActorQueue {
            name: self.name,
            capacity: self.capacity,
            messages: Mutex::new(VecDeque::with_capacity(self.capacity)),
            not_empty: Condvar::new(),
            replies,
            uncapped: self.uncapped_kinds.into_iter().collect(),
            closed: AtomicBool::new(false),
        }
    }
}

/// Bounded FIFO of typed messages owned by one actor.
///
/// Producers never block on a full queue; they get [`QueueError::QueueFull`].
/// Synchronous callers block on the reply slot of their message kind until the
/// owning actor calls [`ActorQueue::reply`].
pub struct ActorQueue<M: Message, R = ()> {
    name: String,
    capacity: usize,
    messages: Mutex<VecDeque<M>>,
    not_empty: Condvar,
    replies: HashMap<M::Kind, ReplySlot<R>>,
    uncapped: HashSet<M::Kind>,
    closed: AtomicBool,
}

impl<M: Message, R> ActorQueue<M, R> {
    /// Start building a queue
    pub fn builder(name: impl Into<String>) -> QueueBuilder<M, R> {
        QueueBuilder {
            name: name.into(),
            capacity: DEFAULT_CAPACITY,
            reply_kinds: Vec::new(),
            uncapped_kinds: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Queue with no synchronous kinds
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self::builder(name).capacity(capacity).build()
    }

    /// Queue name (used in logs and errors)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of queued messages
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    /// Check if no message is queued
    pub fn is_empty(&self) -> bool {
        lock(&self.messages).is_empty()
    }

    /// Check if a kind was declared synchronous
    pub fn has_reply_slot(&self, kind: M::Kind) -> bool {
        self.replies.contains_key(&kind)
    }

    /// Check if a kind bypasses the capacity limit
    pub fn is_uncapped(&self, kind: M::Kind) -> bool {
        self.uncapped.contains(&kind)
    }

    /// Check if the owning actor has stopped receiving
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse further messages and fail every pending synchronous call
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut messages = lock(&self.messages);
            let n = messages.len();
            messages.clear();
            n
        };
        if dropped > 0 {
            debug!("Queue '{}' closed with {} unhandled messages", self.name, dropped);
        }
        for slot in self.replies.values() {
            let _result = lock(&slot.result);
            slot.ready.notify_all();
        }
    }

    fn closed_error(&self) -> QueueError {
        QueueError::Closed {
            queue: self.name.clone(),
        }
    }

    /// Enqueue a message without waiting
    pub fn send(&self, msg: M) -> Result<(), QueueError> {
        self.try_send(msg).map_err(|(e, _)| e)
    }

    /// Enqueue a message without waiting, handing it back on failure
    pub fn try_send(&self, msg: M) -> Result<(), (QueueError, M)> {
        if self.is_closed() {
            return Err((self.closed_error(), msg));
        }
        let mut messages = lock(&self.messages);
        if messages.len() >= self.capacity && !self.uncapped.contains(&msg.kind()) {
            warn!("Queue '{}' full, rejecting {:?}", self.name, msg.kind());
            let err = QueueError::QueueFull {
                queue: self.name.clone(),
                capacity: self.capacity,
            };
            return Err((err, msg));
        }
        messages.push_back(msg);
        drop(messages);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue a message and block until the owning actor replies to its kind
    pub fn send_and_wait(&self, msg: M) -> Result<R, QueueError> {
        let kind = msg.kind();
        let slot = self.replies.get(&kind).ok_or_else(|| QueueError::BadRequest {
            queue: self.name.clone(),
            reason: format!("{:?} has no reply slot", kind),
        })?;

        let _call = lock(&slot.call);
        lock(&slot.result).take();

        self.send(msg)?;
        debug!("Waiting for reply to {:?} on '{}'", kind, self.name);

        let mut result = lock(&slot.result);
        loop {
            if let Some(reply) = result.take() {
                return Ok(reply);
            }
            if self.is_closed() {
                return Err(self.closed_error());
            }
            result = slot.ready.wait(result).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until a message is available and pop it
    pub fn receive(&self) -> M {
        let mut messages = lock(&self.messages);
        loop {
            if let Some(msg) = messages.pop_front() {
                return msg;
            }
            messages = self
                .not_empty
                .wait(messages)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block for at most `timeout` waiting for a message
    pub fn receive_timeout(&self, timeout: Duration) -> Option<M> {
        let deadline = Instant::now() + timeout;
        let mut messages = lock(&self.messages);
        loop {
            if let Some(msg) = messages.pop_front() {
                return Some(msg);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(messages, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            messages = guard;
        }
    }

    /// Pop a message if one is queued
    pub fn try_receive(&self) -> Option<M> {
        lock(&self.messages).pop_front()
    }

    /// Deliver the result of a synchronous call of `kind`
    pub fn reply(&self, kind: M::Kind, result: R) -> Result<(), QueueError> {
        let slot = self.replies.get(&kind).ok_or_else(|| QueueError::BadRequest {
            queue: self.name.clone(),
            reason: format!("reply to {:?} which has no reply slot", kind),
        })?;

        *lock(&slot.result) = Some(result);
        slot.ready.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Data,
        Call,
    }

    #[derive(Debug, PartialEq)]
    enum TestMsg {
        Data(u32),
        Call(u32),
    }

    impl Message for TestMsg {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            match self {
                TestMsg::Data(_) => Kind::Data,
                TestMsg::Call(_) => Kind::Call,
            }
        }
    }

    fn sync_queue(capacity: usize) -> Arc<ActorQueue<TestMsg, u32>> {
        Arc::new(
            ActorQueue::builder("test")
                .capacity(capacity)
                .reply_kind(Kind::Call)
                .build(),
        )
    }

    #[test]
    fn test_capacity_rejects_overflow() {
        let queue: ActorQueue<TestMsg> = ActorQueue::new("small", 4);

        for i in 0..4 {
            queue.send(TestMsg::Data(i)).unwrap();
        }

        let err = queue.send(TestMsg::Data(99)).unwrap_err();
        assert!(matches!(err, QueueError::QueueFull { capacity: 4, .. }));
        assert_eq!(queue.len(), 4);

        // Nothing dropped or reordered
        for i in 0..4 {
            assert_eq!(queue.receive(), TestMsg::Data(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_try_send_hands_message_back() {
        let queue: ActorQueue<TestMsg> = ActorQueue::new("small", 1);
        queue.send(TestMsg::Data(1)).unwrap();

        let (err, msg) = queue.try_send(TestMsg::Data(2)).unwrap_err();
        assert!(matches!(err, QueueError::QueueFull { .. }));
        assert_eq!(msg, TestMsg::Data(2));

        queue.close();
        let (err, msg) = queue.try_send(TestMsg::Data(3)).unwrap_err();
        assert!(matches!(err, QueueError::Closed { .. }));
        assert_eq!(msg, TestMsg::Data(3));
    }

    #[test]
    fn test_uncapped_kind_accepted_when_full() {
        let queue: ActorQueue<TestMsg> = ActorQueue::builder("returns")
            .capacity(1)
            .uncapped_kinds([Kind::Call])
            .build();
        assert!(queue.is_uncapped(Kind::Call));
        assert!(!queue.is_uncapped(Kind::Data));

        queue.send(TestMsg::Data(1)).unwrap();
        assert!(matches!(
            queue.send(TestMsg::Data(2)),
            Err(QueueError::QueueFull { .. })
        ));
        queue.send(TestMsg::Call(3)).unwrap();
        queue.send(TestMsg::Call(4)).unwrap();
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.receive(), TestMsg::Data(1));
        assert_eq!(queue.receive(), TestMsg::Call(3));
        assert_eq!(queue.receive(), TestMsg::Call(4));

        queue.close();
        assert!(matches!(
            queue.send(TestMsg::Call(5)),
            Err(QueueError::Closed { .. })
        ));
    }

    #[test]
    fn test_sync_send_without_slot_is_bad_request() {
        let queue = sync_queue(8);
        let err = queue.send_and_wait(TestMsg::Data(1)).unwrap_err();
        assert!(matches!(err, QueueError::BadRequest { .. }));
        // Rejected before enqueueing
        assert!(queue.is_empty());

        assert!(queue.reply(Kind::Data, 0).is_err());
    }

    #[test]
    fn test_send_and_wait_returns_reply() {
        let queue = sync_queue(8);
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                if let TestMsg::Call(v) = queue.receive() {
                    queue.reply(Kind::Call, v * 2).unwrap();
                }
            })
        };

        assert_eq!(queue.send_and_wait(TestMsg::Call(21)).unwrap(), 42);
        consumer.join().unwrap();
    }

    #[test]
    fn test_same_kind_calls_serialize() {
        let queue = sync_queue(8);
        let returned = Arc::new(AtomicUsize::new(0));

        let callers: Vec<_> = (0..2)
            .map(|i| {
                let queue = Arc::clone(&queue);
                let returned = Arc::clone(&returned);
                thread::spawn(move || {
                    let reply = queue.send_and_wait(TestMsg::Call(i)).unwrap();
                    returned.fetch_add(1, Ordering::SeqCst);
                    reply
                })
            })
            .collect();

        // First call arrives; the second caller must not have enqueued yet
        let first = queue.receive();
        thread::sleep(Duration::from_millis(50));
        assert!(queue.is_empty());
        assert_eq!(returned.load(Ordering::SeqCst), 0);

        let TestMsg::Call(first_value) = first else {
            panic!("unexpected message");
        };
        queue.reply(Kind::Call, first_value + 100).unwrap();

        // Only now does the second call get through
        let second = queue.receive();
        let TestMsg::Call(second_value) = second else {
            panic!("unexpected message");
        };
        assert_ne!(first_value, second_value);
        queue.reply(Kind::Call, second_value + 100).unwrap();

        let mut results: Vec<u32> = callers.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort();
        assert_eq!(results, vec![100, 101]);
    }

    #[test]
    fn test_close_fails_pending_call() {
        let queue = sync_queue(8);
        let caller = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.send_and_wait(TestMsg::Call(1)))
        };

        while queue.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        queue.close();

        assert!(matches!(caller.join().unwrap(), Err(QueueError::Closed { .. })));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_receive_timeout_expires() {
        let queue: ActorQueue<TestMsg> = ActorQueue::new("idle", 2);
        let start = Instant::now();
        assert!(queue.receive_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));

        queue.send(TestMsg::Data(7)).unwrap();
        assert_eq!(
            queue.receive_timeout(Duration::from_millis(20)),
            Some(TestMsg::Data(7))
        );
    }

    #[test]
    fn test_receive_wakes_on_send() {
        let queue: Arc<ActorQueue<TestMsg>> = Arc::new(ActorQueue::new("wake", 2));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.receive())
        };
        thread::sleep(Duration::from_millis(10));
        queue.send(TestMsg::Data(3)).unwrap();
        assert_eq!(consumer.join().unwrap(), TestMsg::Data(3));
    }

    proptest! {
        #[test]
        fn prop_fifo_order(values in proptest::collection::vec(any::<u32>(), 0..DEFAULT_CAPACITY)) {
            let queue: ActorQueue<TestMsg> = ActorQueue::new("fifo", DEFAULT_CAPACITY);
            for v in &values {
                queue.send(TestMsg::Data(*v)).unwrap();
            }
            let received: Vec<u32> = (0..values.len())
                .map(|_| match queue.receive() {
                    TestMsg::Data(v) | TestMsg::Call(v) => v,
                })
                .collect();
            prop_assert_eq!(received, values);
        }
    }
}
