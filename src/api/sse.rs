//! Server-Sent Events support

use crate::state_machine::{ChatState, ChatUpdate};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Initial chat state followed by live updates
pub fn sse_stream(
    init: ChatState,
    broadcast_rx: tokio::sync::broadcast::Receiver<ChatUpdate>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = futures::stream::once(async move { Ok(init_event(&init)) });

    let updates = BroadcastStream::new(broadcast_rx).filter_map(|result| match result {
        Ok(update) => Some(Ok(update_event(&update))),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            // The client should refetch the snapshot
            tracing::warn!(skipped, "SSE subscriber lagged");
            Some(Ok(Event::default().event("lagged").data(skipped.to_string())))
        }
    });

    Sse::new(init.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn init_event(state: &ChatState) -> Event {
    let data = json!({
        "type": "init",
        "status": state.status,
        "messages": state.messages,
        "summary": state.summary,
    });
    Event::default().event("init").data(data.to_string())
}

fn update_event(update: &ChatUpdate) -> Event {
    let name = match update {
        ChatUpdate::TranscriptCleared => "transcript_cleared",
        ChatUpdate::MessageAppended { .. } => "message_appended",
        ChatUpdate::MessageUpdated { .. } => "message_updated",
        ChatUpdate::StatusChanged { .. } => "status_changed",
    };
    let data = serde_json::to_string(update).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).data(data)
}
