use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::info;

use crate::clock::Clock;
use crate::config::Settings;
use crate::dispatch::{Dispatcher, HttpDispatcher};
use crate::error::{SetupError, WorkerGone};
use crate::events::{EventSink, ManagerEvent};
use crate::manager::RequestManager;
use crate::models::{Completion, RequestId};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

// Messages from handles to the control task
pub enum Command {
    SetApiKey(String),
    Queue {
        prompt: String,
        system_prompt: String,
        reply_tx: oneshot::Sender<RequestId>, // one-time channel for the assigned id
    },
    RetryPending,
}

/// Cheap, cloneable front door to the control task.
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ManagerHandle {
    pub fn set_api_key(&self, key: impl Into<String>) -> Result<(), WorkerGone> {
        self.commands
            .send(Command::SetApiKey(key.into()))
            .map_err(|_| WorkerGone)
    }

    pub async fn queue_request(
        &self,
        prompt: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Result<RequestId, WorkerGone> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Queue {
                prompt: prompt.into(),
                system_prompt: system_prompt.into(),
                reply_tx,
            })
            .map_err(|_| WorkerGone)?;
        reply_rx.await.map_err(|_| WorkerGone)
    }

    pub fn retry_pending(&self) -> Result<(), WorkerGone> {
        self.commands
            .send(Command::RetryPending)
            .map_err(|_| WorkerGone)
    }
}

/// Start the control task over an already built manager.
pub fn start<D, S, C>(
    manager: RequestManager<D, S, C>,
    completions: mpsc::UnboundedReceiver<Completion>,
    sweep_interval: Duration,
) -> (ManagerHandle, JoinHandle<()>)
where
    D: Dispatcher + 'static,
    S: EventSink + 'static,
    C: Clock + 'static,
{
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(manager, commands_rx, completions, sweep_interval));
    (
        ManagerHandle {
            commands: commands_tx,
        },
        task,
    )
}

/// Build the HTTP transport and the manager, then start the control task.
pub fn spawn(
    settings: Settings,
) -> Result<
    (
        ManagerHandle,
        mpsc::UnboundedReceiver<ManagerEvent>,
        JoinHandle<()>,
    ),
    SetupError,
> {
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let dispatcher = HttpDispatcher::new(&settings, completions_tx)?;
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let sweep_interval = settings.sweep_interval;

    let manager = RequestManager::new(settings, dispatcher, events_tx);
    let (handle, task) = start(manager, completions_rx, sweep_interval);
    Ok((handle, events_rx, task))
}

// Control loop - the only place the manager is touched
async fn run<D, S, C>(
    mut manager: RequestManager<D, S, C>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut completions: mpsc::UnboundedReceiver<Completion>,
    sweep_interval: Duration,
) where
    D: Dispatcher,
    S: EventSink,
    C: Clock,
{
    // interval_at panics on a zero period
    let sweep_interval = sweep_interval.max(MIN_SWEEP_INTERVAL);
    info!(sweep_interval = ?sweep_interval, "Request manager worker started");

    // first tick one interval from now, not immediately
    let mut sweep = interval_at(Instant::now() + sweep_interval, sweep_interval);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::SetApiKey(key)) => manager.set_api_key(key),
                Some(Command::Queue { prompt, system_prompt, reply_tx }) => {
                    let id = manager.queue_request(prompt, system_prompt);
                    let _ = reply_tx.send(id);
                }
                Some(Command::RetryPending) => manager.retry_pending(),
                // every handle dropped
                None => break,
            },
            Some(completion) = completions.recv() => manager.handle_completion(completion),
            _ = sweep.tick() => manager.sweep(),
        }
    }

    info!(
        queued = manager.queue_len(),
        in_flight = !manager.is_idle(),
        "Request manager worker stopped"
    );
}
