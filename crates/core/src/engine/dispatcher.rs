use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Receiver, Sender};

use crate::handle::Client;
use crate::request::AsyncOp;
use crate::{BusError, CancelToken, Result};

use super::Engine;

/// One accepted asynchronous request.
pub(crate) struct Job {
    pub client: Arc<Client>,
    pub seq: u64,
    pub token: u64,
    pub op: AsyncOp,
    pub cancel: CancelToken,
}

enum Message {
    Run(Job),
    Stop,
}

/// The engine's own execution context for asynchronous requests.
pub(crate) struct Dispatcher {
    sender: Sender<Message>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Dispatcher {
    pub fn start(engine: Arc<Engine>, name: &str) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(engine, receiver))
            .map_err(|err| {
                tracing::error!(error = %err, "failed to spawn dispatcher thread");
                BusError::Generic
            })?;
        let thread_id = thread.thread().id();
        tracing::debug!(thread = name, "dispatcher started");
        Ok(Self {
            sender,
            thread: Some(thread),
            thread_id,
        })
    }

    pub fn submit(&self, job: Job) -> Result<()> {
        self.sender
            .send(Message::Run(job))
            .map_err(|_| BusError::Uninitialized)
    }

    /// Lets queued jobs finish, then stops the thread. Joins unless called
    /// from the dispatcher itself.
    pub fn stop(mut self) {
        let _ = self.sender.send(Message::Stop);
        if let Some(thread) = self.thread.take() {
            if thread::current().id() == self.thread_id {
                return;
            }
            if thread.join().is_err() {
                tracing::error!("dispatcher thread panicked");
            }
        }
        tracing::debug!("dispatcher stopped");
    }
}

fn run(engine: Arc<Engine>, receiver: Receiver<Message>) {
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(job) => engine.run_job(job),
            Message::Stop => break,
        }
    }
}
