//! Actor thread loop

use crate::{ActorQueue, Message};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// What the loop does after a handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep receiving
    Continue,
    /// Stop the loop (the handled message was an exit request)
    Exit,
}

/// What the loop does when no message is queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idle {
    /// Nothing else to do, block until a message arrives
    Block,
    /// Wait for a message at most this long, then call `on_idle` again
    Wait(Duration),
    /// Work was done, check the queue again right away
    Again,
}

/// Message handler owned by one actor
pub trait Handler<M: Message, R = ()>: Send {
    /// Handle one message. The queue is passed so synchronous kinds can be replied to.
    fn handle(&mut self, msg: M, queue: &ActorQueue<M, R>) -> Flow;

    /// Called whenever the queue is empty. Messages always take priority over
    /// idle work.
    fn on_idle(&mut self, _queue: &ActorQueue<M, R>) -> Idle {
        Idle::Block
    }
}

/// Closes the queue when the loop ends, including by panic
struct CloseOnDrop<'a, M: Message, R>(&'a ActorQueue<M, R>);

impl<M: Message, R> Drop for CloseOnDrop<'_, M, R> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Run the "receive, handle, repeat" loop on the calling thread until the
/// handler returns [`Flow::Exit`]. The queue is closed afterwards.
pub fn run_actor<M, R, H>(queue: &ActorQueue<M, R>, handler: &mut H)
where
    M: Message,
    H: Handler<M, R>,
{
    let _close = CloseOnDrop(queue);
    info!("Actor '{}' started", queue.name());
    let mut handled = 0u64;

    loop {
        let msg = match queue.try_receive() {
            Some(msg) => msg,
            None => match handler.on_idle(queue) {
                Idle::Block => queue.receive(),
                Idle::Wait(timeout) => match queue.receive_timeout(timeout) {
                    Some(msg) => msg,
                    None => continue,
                },
                Idle::Again => continue,
            },
        };
        handled += 1;
        if handler.handle(msg, queue) == Flow::Exit {
            break;
        }
    }

    debug!("Actor '{}' handled {} messages", queue.name(), handled);
    info!("Actor '{}' stopped", queue.name());
}

/// Spawn an actor on its own named OS thread
pub fn spawn_actor<M, R, H>(queue: Arc<ActorQueue<M, R>>, mut handler: H) -> io::Result<JoinHandle<()>>
where
    M: Message + 'static,
    R: Send + 'static,
    H: Handler<M, R> + 'static,
{
    let name = queue.name().to_string();
    thread::Builder::new()
        .name(name)
        .spawn(move || run_actor(&queue, &mut handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueError;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Add,
        Total,
        Exit,
    }

    enum CounterMsg {
        Add(u64),
        Total,
        Exit,
    }

    impl Message for CounterMsg {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            match self {
                CounterMsg::Add(_) => Kind::Add,
                CounterMsg::Total => Kind::Total,
                CounterMsg::Exit => Kind::Exit,
            }
        }
    }

    struct Counter {
        total: u64,
    }

    impl Handler<CounterMsg, u64> for Counter {
        fn handle(&mut self, msg: CounterMsg, queue: &ActorQueue<CounterMsg, u64>) -> Flow {
            match msg {
                CounterMsg::Add(v) => self.total += v,
                CounterMsg::Total => {
                    let _ = queue.reply(Kind::Total, self.total);
                }
                CounterMsg::Exit => return Flow::Exit,
            }
            Flow::Continue
        }
    }

    #[test]
    fn test_actor_handles_until_exit() {
        let queue: Arc<ActorQueue<CounterMsg, u64>> = Arc::new(
            ActorQueue::builder("counter")
                .reply_kind(Kind::Total)
                .build(),
        );
        let handle = spawn_actor(Arc::clone(&queue), Counter { total: 0 }).unwrap();

        for v in 1..=4 {
            queue.send(CounterMsg::Add(v)).unwrap();
        }
        assert_eq!(queue.send_and_wait(CounterMsg::Total).unwrap(), 10);

        queue.send(CounterMsg::Exit).unwrap();
        handle.join().unwrap();

        assert!(queue.is_closed());
        assert!(matches!(queue.send(CounterMsg::Add(1)), Err(QueueError::Closed { .. })));
        assert!(matches!(queue.send_and_wait(CounterMsg::Total), Err(QueueError::Closed { .. })));
    }

    /// Counts up on its own while idle, until `budget` ticks are done
    struct Ticker {
        ticks: u64,
        budget: u64,
    }

    impl Handler<CounterMsg, u64> for Ticker {
        fn handle(&mut self, msg: CounterMsg, queue: &ActorQueue<CounterMsg, u64>) -> Flow {
            match msg {
                CounterMsg::Add(v) => self.budget += v,
                CounterMsg::Total => {
                    let _ = queue.reply(Kind::Total, self.ticks);
                }
                CounterMsg::Exit => return Flow::Exit,
            }
            Flow::Continue
        }

        fn on_idle(&mut self, _queue: &ActorQueue<CounterMsg, u64>) -> Idle {
            if self.ticks < self.budget {
                self.ticks += 1;
                Idle::Again
            } else {
                Idle::Wait(Duration::from_millis(5))
            }
        }
    }

    #[test]
    fn test_idle_work_runs_between_messages() {
        let queue: Arc<ActorQueue<CounterMsg, u64>> = Arc::new(
            ActorQueue::builder("ticker")
                .reply_kind(Kind::Total)
                .build(),
        );
        let handle = spawn_actor(Arc::clone(&queue), Ticker { ticks: 0, budget: 0 }).unwrap();

        queue.send(CounterMsg::Add(3)).unwrap();
        let mut ticks = 0;
        for _ in 0..100 {
            ticks = queue.send_and_wait(CounterMsg::Total).unwrap();
            if ticks == 3 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ticks, 3);

        queue.send(CounterMsg::Exit).unwrap();
        handle.join().unwrap();
    }
}
