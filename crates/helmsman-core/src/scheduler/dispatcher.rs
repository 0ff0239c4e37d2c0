//! Single-process schedule event dispatcher.
//!
//! Schedule events are the engine's only trigger: every continuation of a
//! run happens because a `ScheduleId` was delivered here. The dispatcher
//! drains an unbounded mpsc queue one event at a time; enqueueing never
//! blocks the caller. A failing handler poisons only its own event: the
//! error is logged and the loop moves on, so one broken run cannot starve
//! the rest.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use helmsman_types::id::ScheduleId;

/// Consumer side of the dispatcher: one call per delivered event.
///
/// Object-safe (boxed future) so the dispatcher can hold any engine.
pub trait ScheduleEventHandler: Send + Sync {
    fn handle_schedule_event(&self, schedule_id: ScheduleId) -> BoxFuture<'_, anyhow::Result<()>>;
}

/// Cloneable producer handle for enqueueing schedule events.
pub struct EventQueue {
    sender: mpsc::UnboundedSender<ScheduleId>,
}

impl EventQueue {
    /// Enqueue an event for immediate delivery. Never blocks.
    ///
    /// If the dispatcher has shut down the event is dropped with a warning;
    /// delivery is at-least-once only while the dispatcher lives.
    pub fn enqueue_schedule_event(&self, schedule_id: ScheduleId) {
        if self.sender.send(schedule_id).is_err() {
            tracing::warn!(
                schedule_id = %schedule_id,
                "event dispatcher stopped, dropping schedule event"
            );
        }
    }

    /// Enqueue an event after a delay, without blocking the caller.
    pub fn enqueue_after(&self, delay: Duration, schedule_id: ScheduleId) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(schedule_id).is_err() {
                tracing::warn!(
                    schedule_id = %schedule_id,
                    "event dispatcher stopped, dropping delayed schedule event"
                );
            }
        });
    }
}

impl Clone for EventQueue {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// The dispatch loop. Create once, hand the [`EventQueue`] to producers,
/// then `run` (or `spawn`) with the handler.
pub struct EventScheduler {
    receiver: mpsc::UnboundedReceiver<ScheduleId>,
    cancel: CancellationToken,
}

impl EventScheduler {
    pub fn new() -> (Self, EventQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                receiver,
                cancel: CancellationToken::new(),
            },
            EventQueue { sender },
        )
    }

    /// Token that stops the dispatch loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain events until cancelled or all queue handles are dropped.
    ///
    /// Events are processed strictly one at a time; a handler error is
    /// logged and the event is dropped without retry.
    pub async fn run<H: ScheduleEventHandler>(mut self, handler: Arc<H>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("event dispatcher shutting down");
                    break;
                }
                maybe_event = self.receiver.recv() => {
                    let Some(schedule_id) = maybe_event else {
                        tracing::info!("all event queue handles dropped, dispatcher stopping");
                        break;
                    };
                    if let Err(e) = handler.handle_schedule_event(schedule_id).await {
                        tracing::error!(
                            schedule_id = %schedule_id,
                            error = %e,
                            "Unexpected error. Aborting message retry"
                        );
                    }
                }
            }
        }
    }

    /// Run the dispatch loop on a background task.
    pub fn spawn<H: ScheduleEventHandler + 'static>(
        self,
        handler: Arc<H>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(handler))
    }
}
