use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

use teq_engine::Engine;

use crate::backend::{OfflineBackend, RenderedBlock};

const IDLE_SLEEP: Duration = Duration::from_micros(200);

enum RunnerMessage {
    Run(usize),
    Stop,
}

/// Drives an engine from a thread the way an audio backend would, but only
/// when there is something to do: a block is processed when commands are
/// waiting or when blocks have been requested with [`OfflineRunner::run_blocks`].
/// Playback time therefore only moves on request.
pub struct OfflineRunner {
    control: Sender<RunnerMessage>,
    blocks: Receiver<RenderedBlock>,
    thread: Option<JoinHandle<Engine>>,
}

impl OfflineRunner {
    pub fn spawn(mut engine: Engine, backend: OfflineBackend, block_size: u32) -> Self {
        let (control_tx, control_rx) = unbounded();
        let (block_tx, block_rx) = unbounded();

        let thread = thread::spawn(move || {
            let mut requested = 0usize;
            let mut index = 0u64;
            let mut frame_time = 0u64;

            'run: loop {
                loop {
                    match control_rx.try_recv() {
                        Ok(RunnerMessage::Run(count)) => requested += count,
                        Ok(RunnerMessage::Stop) | Err(TryRecvError::Disconnected) => break 'run,
                        Err(TryRecvError::Empty) => break,
                    }
                }

                if requested == 0 && !engine.has_pending_commands() {
                    thread::sleep(IDLE_SLEEP);
                    continue;
                }

                let mut block = backend.block(block_size);
                engine.process(&mut block, block_size);
                let rendered = block.finish(index, frame_time);

                requested = requested.saturating_sub(1);
                index += 1;
                frame_time += block_size as u64;
                // Nobody listening is fine
                let _ = block_tx.send(rendered);
            }

            log::debug!("offline runner stopped after {index} blocks");
            engine
        });

        Self {
            control: control_tx,
            blocks: block_rx,
            thread: Some(thread),
        }
    }

    /// Asks for `count` more blocks.
    pub fn run_blocks(&self, count: usize) {
        let _ = self.control.send(RunnerMessage::Run(count));
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<RenderedBlock> {
        match self.blocks.recv_timeout(timeout) {
            Ok(block) => Some(block),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Requests `count` blocks and collects them, together with any block
    /// processed for queued commands in the meantime.
    pub fn render(&self, count: usize, timeout: Duration) -> Vec<RenderedBlock> {
        let mut blocks = self.drain();
        let target = blocks.len() + count;
        self.run_blocks(count);

        let deadline = Instant::now() + timeout;
        while blocks.len() < target {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv_timeout(remaining) {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        blocks
    }

    /// Blocks processed so far that have not been received yet.
    pub fn drain(&self) -> Vec<RenderedBlock> {
        self.blocks.try_iter().collect()
    }

    /// Stops the thread and hands the engine back.
    pub fn stop(mut self) -> anyhow::Result<Engine> {
        let _ = self.control.send(RunnerMessage::Stop);
        let thread = self
            .thread
            .take()
            .ok_or_else(|| anyhow::anyhow!("offline runner already stopped"))?;
        thread
            .join()
            .map_err(|_| anyhow::anyhow!("offline runner thread panicked"))
    }
}

impl Drop for OfflineRunner {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.control.send(RunnerMessage::Stop);
            let _ = thread.join();
        }
    }
}
