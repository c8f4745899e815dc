use crate::aggregate::{Aggregator, Metrics};
use crate::error::{CancelReason, TurnError};
use crate::provider::{CancelHandle, ChatMessage, Dispatch, Dispatcher, Router};
use crate::turn::{self, TurnEvent, TurnEventKind, TurnId, TurnOutput};
use std::time::Instant;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Placeholder of the turn in flight.
    Streaming,
    Complete,
    /// Cancelled; content holds what arrived before the stop.
    Stopped(CancelReason),
    /// Content holds the error text.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Data URI of a generated image.
    pub image: Option<String>,
    pub metrics: Option<Metrics>,
    pub status: MessageStatus,
}

impl Message {
    fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            image: None,
            metrics: None,
            status: MessageStatus::Complete,
        }
    }

    fn placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            image: None,
            metrics: None,
            status: MessageStatus::Streaming,
        }
    }
}

/// What `Session::apply` did with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// Fragment appended to the placeholder.
    Folded(String),
    /// The turn ended and the placeholder got its final value.
    Finalized,
    /// Stale, cancelled, or orphaned; nothing changed.
    Ignored,
}

struct ActiveTurn {
    id: TurnId,
    cancel: CancelHandle,
    aggregator: Aggregator,
    /// False once `clear` dropped the placeholder.
    attached: bool,
}

/// One chat conversation and at most one turn in flight.
///
/// Turn tasks never touch the session directly; they report through the
/// event channel returned by [`Session::new`], and the owner feeds those
/// events back through [`Session::apply`].
pub struct Session {
    router: Router,
    dispatcher: Dispatcher,
    model: String,
    messages: Vec<Message>,
    active: Option<ActiveTurn>,
    next_turn: u64,
    events: mpsc::UnboundedSender<TurnEvent>,
}

impl Session {
    pub fn new(
        router: Router,
        dispatcher: Dispatcher,
        model: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let session = Self {
            router,
            dispatcher,
            model: model.into(),
            messages: Vec::new(),
            active: None,
            next_turn: 1,
            events,
        };
        (session, rx)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_in_flight(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_turn(&self) -> Option<TurnId> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Start a turn for `text`. Returns `None` when the text is blank or a
    /// turn is already running. Must be called within a tokio runtime.
    pub fn submit(&mut self, text: &str) -> Option<TurnId> {
        if text.trim().is_empty() {
            return None;
        }
        if let Some(active) = &self.active {
            tracing::debug!(turn = %active.id, "submit rejected; turn in flight");
            return None;
        }

        self.messages.push(Message::user(text));

        let descriptor = self.router.route(&self.model);
        let payload = descriptor.body(&self.model, &self.transcript());
        let Dispatch { body, cancel } = self.dispatcher.dispatch(&descriptor, payload);

        let id = TurnId(self.next_turn);
        self.next_turn += 1;

        self.messages.push(Message::placeholder());
        self.active = Some(ActiveTurn {
            id,
            cancel: cancel.clone(),
            aggregator: Aggregator::start(Instant::now()),
            attached: true,
        });

        tracing::debug!(turn = %id, model = %self.model, provider = descriptor.kind.name(), "turn started");
        tokio::spawn(turn::drive(id, body, descriptor.format, cancel, self.events.clone()));
        Some(id)
    }

    /// Cancel the turn in flight. Returns false when idle.
    pub fn stop(&mut self) -> bool {
        match &self.active {
            Some(active) => {
                active.cancel.cancel(CancelReason::Stopped);
                true
            }
            None => false,
        }
    }

    /// Drop every message. A running turn keeps going but can no longer
    /// write into the transcript.
    pub fn clear(&mut self) {
        self.messages.clear();
        if let Some(active) = &mut self.active {
            active.attached = false;
        }
    }

    /// Switch models for the next turn. Blank ids are rejected.
    pub fn select_model(&mut self, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() {
            return false;
        }
        if id != self.model {
            tracing::debug!(from = %self.model, to = id, "model selected");
            self.model = id.to_string();
        }
        true
    }

    /// Apply an event reported by a turn task.
    pub fn apply(&mut self, event: TurnEvent) -> Applied {
        let Some(active) = self.active.as_mut() else {
            return Applied::Ignored;
        };
        if event.turn != active.id {
            tracing::trace!(turn = %event.turn, current = %active.id, "dropping stale event");
            return Applied::Ignored;
        }

        match event.kind {
            TurnEventKind::Fragment(text) => {
                if !active.attached || active.cancel.is_cancelled() {
                    return Applied::Ignored;
                }
                let so_far = active.aggregator.fold(&text);
                if let Some(last) = self.messages.last_mut() {
                    last.content.clear();
                    last.content.push_str(so_far);
                }
                Applied::Folded(text)
            }
            TurnEventKind::Finished(result) => {
                self.finalize(result);
                Applied::Finalized
            }
        }
    }

    /// The single exit of every turn: release the in-flight slot and write
    /// the placeholder once.
    fn finalize(&mut self, result: Result<TurnOutput, TurnError>) {
        let Some(active) = self.active.take() else {
            return;
        };
        // A cancel recorded before this point wins over the reported outcome.
        let result = match active.cancel.reason() {
            Some(reason) => Err(TurnError::Cancelled(reason)),
            None => result,
        };
        if !active.attached {
            tracing::debug!(turn = %active.id, "detached turn ended");
            return;
        }
        let Some(last) = self.messages.last_mut() else {
            return;
        };

        let agg = &active.aggregator;
        match result {
            Ok(TurnOutput::Text) => {
                let metrics = agg.finish(Instant::now());
                tracing::info!(
                    turn = %active.id,
                    tokens = metrics.total_tokens,
                    secs = metrics.time_taken,
                    tps = metrics.tokens_per_second,
                    "turn complete"
                );
                last.content = agg.text().to_string();
                last.metrics = Some(metrics);
                last.status = MessageStatus::Complete;
            }
            Ok(TurnOutput::Image(uri)) => {
                last.content = "Image generated:".to_string();
                last.image = Some(uri);
                last.status = MessageStatus::Complete;
            }
            Err(TurnError::Cancelled(reason)) => {
                last.content = agg.text().to_string();
                last.status = MessageStatus::Stopped(reason);
            }
            Err(e) => {
                last.content = format!("An error occurred: {e}");
                last.status = MessageStatus::Failed;
            }
        }
    }

    /// Completed conversation as sent upstream.
    fn transcript(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.status == MessageStatus::Complete && m.image.is_none())
            .map(|m| ChatMessage {
                role: m.role.as_str(),
                content: m.content.clone(),
            })
            .collect()
    }
}
