use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use basedrop::{Handle, Owned};
use teq_transport::{ChannelKind, TeqError};

use crate::EngineState;

pub type CommandFn = Box<dyn FnMut(&mut EngineState) + Send>;

/// A queued edit. The closure runs once on the audio thread; its memory is
/// handed back to the collector and freed on the control side.
pub type Command = Owned<CommandFn>;

/// Acknowledgment shared by both ends of the command channel. Holds the number
/// of commands the audio thread has executed.
struct Ack {
    completed: Mutex<u64>,
    cond: Condvar,
}

pub fn channel(capacity: usize, handle: Handle, timeout: Duration) -> (CommandSender, CommandReceiver) {
    let (producer, consumer) = rtrb::RingBuffer::<Command>::new(capacity);
    let ack = Arc::new(Ack {
        completed: Mutex::new(0),
        cond: Condvar::new(),
    });
    (
        CommandSender {
            producer,
            handle,
            ack: ack.clone(),
            sent: 0,
            timeout,
        },
        CommandReceiver {
            consumer,
            ack,
            executed: 0,
            acknowledged: 0,
        },
    )
}

/// Control side of the command channel.
pub struct CommandSender {
    producer: rtrb::Producer<Command>,
    handle: Handle,
    ack: Arc<Ack>,
    sent: u64,
    timeout: Duration,
}

impl CommandSender {
    /// Enqueues `f` without waiting for it to run.
    pub fn write<F>(&mut self, f: F) -> Result<(), TeqError>
    where
        F: FnMut(&mut EngineState) + Send + 'static,
    {
        let command = Owned::new(&self.handle, Box::new(f) as CommandFn);
        self.producer
            .push(command)
            .map_err(|_| TeqError::ChannelFull(ChannelKind::Command))?;
        self.sent += 1;
        Ok(())
    }

    /// Enqueues `f` and blocks until the audio thread has executed it.
    ///
    /// On `CommandTimeout` the command stays queued and still runs once the
    /// process callback resumes.
    pub fn write_and_wait<F>(&mut self, f: F) -> Result<(), TeqError>
    where
        F: FnMut(&mut EngineState) + Send + 'static,
    {
        self.write(f)?;
        self.wait_for(self.sent)
    }

    /// Blocks until every command written so far has been executed.
    pub fn wait(&self) -> Result<(), TeqError> {
        self.wait_for(self.sent)
    }

    fn wait_for(&self, target: u64) -> Result<(), TeqError> {
        let completed = self
            .ack
            .completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (_completed, result) = self
            .ack
            .cond
            .wait_timeout_while(completed, self.timeout, |completed| *completed < target)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() {
            return Err(TeqError::CommandTimeout(self.timeout));
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.producer.buffer().capacity() - self.producer.slots()
    }
}

/// Audio-thread side of the command channel.
pub struct CommandReceiver {
    consumer: rtrb::Consumer<Command>,
    ack: Arc<Ack>,
    executed: u64,
    acknowledged: u64,
}

impl CommandReceiver {
    /// Runs every queued command in FIFO order, then signals the control side.
    /// Never blocks: if the ack lock is contended the signal is retried on the
    /// next call.
    pub fn drain(&mut self, state: &mut EngineState) -> usize {
        let mut count = 0;
        while let Ok(mut command) = self.consumer.pop() {
            (*command)(state);
            count += 1;
            self.executed += 1;
            // `command` goes back to the collector here
        }
        if self.executed != self.acknowledged {
            self.try_acknowledge();
        }
        count
    }

    fn try_acknowledge(&mut self) {
        if let Ok(mut completed) = self.ack.completed.try_lock() {
            *completed = self.executed;
            self.acknowledged = self.executed;
            self.ack.cond.notify_all();
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.consumer.is_empty()
    }

    pub fn ack_pending(&self) -> bool {
        self.executed != self.acknowledged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Collector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use teq_transport::Song;

    fn state() -> EngineState {
        EngineState::new(Arc::new(Song::default()), 8, 8.0)
    }

    #[test]
    fn test_write_fails_when_full() {
        let collector = Collector::new();
        let (mut tx, _rx) = channel(2, collector.handle(), Duration::from_millis(10));
        tx.write(|_| {}).unwrap();
        tx.write(|_| {}).unwrap();
        assert_eq!(
            tx.write(|_| {}),
            Err(TeqError::ChannelFull(ChannelKind::Command))
        );
        assert_eq!(tx.pending(), 2);
    }

    #[test]
    fn test_commands_run_in_order() {
        let collector = Collector::new();
        let (mut tx, mut rx) = channel(8, collector.handle(), Duration::from_millis(10));
        tx.write(|state| state.set_global_tempo(1.0)).unwrap();
        tx.write(|state| state.set_global_tempo(state.transport().global_tempo * 3.0))
            .unwrap();

        let mut state = state();
        assert_eq!(rx.drain(&mut state), 2);
        assert_eq!(state.transport().global_tempo, 3.0);
        assert!(!rx.ack_pending());
    }

    #[test]
    fn test_write_and_wait_times_out_without_callback() {
        let collector = Collector::new();
        let (mut tx, mut rx) = channel(8, collector.handle(), Duration::from_millis(20));
        let result = tx.write_and_wait(|state| state.set_global_tempo(2.0));
        assert_eq!(
            result,
            Err(TeqError::CommandTimeout(Duration::from_millis(20)))
        );

        // Still queued, and runs once the callback resumes
        let mut state = state();
        assert_eq!(rx.drain(&mut state), 1);
        assert_eq!(state.transport().global_tempo, 2.0);
        assert!(tx.wait().is_ok());
    }

    #[test]
    fn test_write_and_wait_returns_after_execution() {
        let collector = Collector::new();
        let (mut tx, mut rx) = channel(8, collector.handle(), Duration::from_secs(5));
        let runs = Arc::new(AtomicUsize::new(0));

        let worker = std::thread::spawn(move || {
            let mut state = state();
            let mut drained = 0;
            while drained < 3 {
                drained += rx.drain(&mut state);
                std::thread::sleep(Duration::from_micros(100));
            }
        });

        for _ in 0..3 {
            let runs = runs.clone();
            tx.write_and_wait(move |_| {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        worker.join().unwrap();
    }

    #[test]
    fn test_contended_ack_is_retried() {
        let collector = Collector::new();
        let (mut tx, mut rx) = channel(8, collector.handle(), Duration::from_millis(10));
        tx.write(|_| {}).unwrap();

        let mut state = state();
        let ack = rx.ack.clone();
        {
            let _held = ack.completed.lock().unwrap();
            rx.drain(&mut state);
            assert!(rx.ack_pending());
        }
        rx.drain(&mut state);
        assert!(!rx.ack_pending());
        assert!(tx.wait().is_ok());
    }

    #[test]
    fn test_consumed_commands_are_freed_by_collector() {
        let mut collector = Collector::new();
        let (mut tx, mut rx) = channel(8, collector.handle(), Duration::from_millis(10));
        let payload = Arc::new(());
        let captured = payload.clone();
        tx.write(move |_| {
            let _ = &captured;
        })
        .unwrap();

        let mut state = state();
        rx.drain(&mut state);
        assert_eq!(Arc::strong_count(&payload), 2);
        collector.collect();
        assert_eq!(Arc::strong_count(&payload), 1);
    }
}
