//! Async driver for the engine
//!
//! The [`Engine`] is moved into a single actor task that owns it outright.
//! Ticker tasks and [`EngineHandle`]s talk to the actor over one bounded
//! inbox, so ingestion, windowed jobs and control commands are serialized in
//! arrival order. The debounce slot is fired by the actor itself.

use crate::clock::Millis;
use crate::encoder::SnapshotDocument;
use crate::engine::{Engine, Job};
use crate::error::EngineError;
use crate::history::TrimReport;
use crate::schema::RawEvent;
use crate::types::{EngineStatus, StateVector, TagRecord};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Default inbox capacity
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

enum Command {
    Ingest(RawEvent),
    Run(Job),
    Tag {
        category: String,
        note: String,
        reply: oneshot::Sender<TagRecord>,
    },
    Clear(oneshot::Sender<StateVector>),
    SetRecording(bool),
    Status(oneshot::Sender<EngineStatus>),
    Export(oneshot::Sender<SnapshotDocument>),
    Flush(oneshot::Sender<Result<(), EngineError>>),
    TrimMemory(oneshot::Sender<TrimReport>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    /// Queue a raw event; waits while the inbox is full
    pub async fn ingest(&self, event: RawEvent) -> Result<(), EngineError> {
        self.send(Command::Ingest(event)).await
    }

    pub async fn tag(
        &self,
        category: impl Into<String>,
        note: impl Into<String>,
    ) -> Result<TagRecord, EngineError> {
        let (category, note) = (category.into(), note.into());
        self.request(|reply| Command::Tag {
            category,
            note,
            reply,
        })
        .await
    }

    pub async fn clear_session(&self) -> Result<StateVector, EngineError> {
        self.request(Command::Clear).await
    }

    pub async fn set_recording(&self, recording: bool) -> Result<(), EngineError> {
        self.send(Command::SetRecording(recording)).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(Command::Status).await
    }

    pub async fn export_snapshot(&self) -> Result<SnapshotDocument, EngineError> {
        self.request(Command::Export).await
    }

    pub async fn flush(&self) -> Result<(), EngineError> {
        self.request(Command::Flush).await?
    }

    pub async fn trim_memory(&self) -> Result<TrimReport, EngineError> {
        self.request(Command::TrimMemory).await
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| EngineError::EngineStopped)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| EngineError::EngineStopped)
    }
}

/// A spawned engine actor plus its ticker tasks
#[derive(Debug)]
pub struct EngineRuntime {
    handle: EngineHandle,
    actor: JoinHandle<Engine>,
    tickers: Vec<JoinHandle<()>>,
}

impl EngineRuntime {
    /// Spawn the actor and one ticker per periodic job
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(engine: Engine) -> Self {
        Self::with_capacity(engine, DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_capacity(engine: Engine, inbox_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(inbox_capacity.max(1));
        let windows = engine.config().windows.clone();

        let tickers = Job::ALL
            .into_iter()
            .map(|job| spawn_ticker(tx.clone(), job, job.period_ms(&windows)))
            .collect();

        info!(session_id = engine.session_id(), "engine runtime started");
        Self {
            handle: EngineHandle { tx },
            actor: tokio::spawn(run_actor(engine, rx)),
            tickers,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop tickers, flush and hand the engine back
    pub async fn shutdown(self) -> Result<Engine, EngineError> {
        for ticker in &self.tickers {
            ticker.abort();
        }
        let (reply, rx) = oneshot::channel();
        if self.handle.send(Command::Shutdown(reply)).await.is_ok() {
            let _ = rx.await;
        }
        self.actor.await.map_err(|_| EngineError::EngineStopped)
    }
}

fn spawn_ticker(tx: mpsc::Sender<Command>, job: Job, period_ms: i64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_millis(period_ms.max(1) as u64);
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if tx.send(Command::Run(job)).await.is_err() {
                break;
            }
        }
    })
}

async fn run_actor(mut engine: Engine, mut rx: mpsc::Receiver<Command>) -> Engine {
    loop {
        let wait = engine
            .debounce_deadline()
            .map(|deadline| wait_until(deadline, engine.now()));

        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else {
                    engine.shutdown();
                    break;
                };
                if !handle(&mut engine, command) {
                    break;
                }
            }
            _ = debounce_timer(wait) => {
                engine.poll_debounce();
            }
        }
    }
    debug!("engine actor stopped");
    engine
}

fn wait_until(deadline: Millis, now: Millis) -> Duration {
    Duration::from_millis((deadline - now).max(0) as u64)
}

async fn debounce_timer(wait: Option<Duration>) {
    match wait {
        Some(wait) => time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

/// Apply one command; returns false once the engine has shut down
fn handle(engine: &mut Engine, command: Command) -> bool {
    match command {
        Command::Ingest(event) => {
            engine.ingest(event);
        }
        Command::Run(job) => engine.run_job(job),
        Command::Tag {
            category,
            note,
            reply,
        } => {
            let _ = reply.send(engine.tag(&category, &note));
        }
        Command::Clear(reply) => {
            let _ = reply.send(engine.clear_session());
        }
        Command::SetRecording(recording) => engine.set_recording(recording),
        Command::Status(reply) => {
            let _ = reply.send(engine.status());
        }
        Command::Export(reply) => {
            let _ = reply.send(engine.export_snapshot());
        }
        Command::Flush(reply) => {
            let _ = reply.send(engine.flush());
        }
        Command::TrimMemory(reply) => {
            let _ = reply.send(engine.trim_memory());
        }
        Command::Shutdown(reply) => {
            engine.shutdown();
            let _ = reply.send(());
            return false;
        }
    }
    true
}
