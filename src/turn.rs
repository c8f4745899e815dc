use crate::error::TurnError;
use crate::provider::decode::{decode_image, Fragments};
use crate::provider::{ByteStream, CancelHandle, WireFormat};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

/// Identifies a turn within a session. Strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnId(pub u64);

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a turn ended when it ended well.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutput {
    /// All fragments were delivered.
    Text,
    /// Image turn; carries the data URI.
    Image(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnEventKind {
    Fragment(String),
    /// Always the last event of a turn, sent exactly once.
    Finished(Result<TurnOutput, TurnError>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnEvent {
    pub turn: TurnId,
    pub kind: TurnEventKind,
}

/// Drive one turn to completion, reporting to `tx`.
pub async fn drive(
    turn: TurnId,
    body: ByteStream,
    format: WireFormat,
    cancel: CancelHandle,
    tx: mpsc::UnboundedSender<TurnEvent>,
) {
    let result = run(turn, body, format, &cancel, &tx).await;
    match &result {
        Ok(_) => tracing::debug!(%turn, "turn finished"),
        Err(e) if e.is_cancelled() => tracing::info!(%turn, "turn {e}"),
        Err(e) => tracing::warn!(%turn, error = %e, "turn failed"),
    }
    let _ = tx.send(TurnEvent {
        turn,
        kind: TurnEventKind::Finished(result),
    });
}

async fn run(
    turn: TurnId,
    body: ByteStream,
    format: WireFormat,
    cancel: &CancelHandle,
    tx: &mpsc::UnboundedSender<TurnEvent>,
) -> Result<TurnOutput, TurnError> {
    let format = match format {
        WireFormat::Stream(f) => f,
        WireFormat::ImagePayload => {
            let mut body = body;
            let mut buf = Vec::new();
            while let Some(chunk) = body.next().await {
                buf.extend_from_slice(&chunk?);
            }
            return decode_image(&buf).map(TurnOutput::Image);
        }
    };

    let mut fragments = Fragments::new(body, format);
    while let Some(item) = fragments.next().await {
        let text = item?;
        // Anything that raced the cancel is dropped.
        if cancel.is_cancelled() {
            break;
        }
        let ev = TurnEvent {
            turn,
            kind: TurnEventKind::Fragment(text),
        };
        if tx.send(ev).is_err() {
            break;
        }
    }

    match cancel.reason() {
        Some(reason) => Err(TurnError::Cancelled(reason)),
        None => Ok(TurnOutput::Text),
    }
}
