//! Server-Sent Events stream of run progress.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use engine::observer::RunEvent;
use futures::stream::Stream;
use tokio::sync::broadcast;
use tracing::warn;

use crate::state::AppState;

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = run_event_stream(state.event_tx.subscribe());
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
}

fn run_event_stream(
    mut rx: broadcast::Receiver<RunEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(run_event) => {
                    if let Some(event) = to_sse(&run_event) {
                        yield Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    }
}

fn to_sse(run_event: &RunEvent) -> Option<Event> {
    match serde_json::to_string(run_event) {
        Ok(json) => Some(Event::default().event("run").data(json)),
        Err(err) => {
            warn!(err = %err, "failed to serialize run event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use engine::core::types::Status;

    #[tokio::test]
    async fn stream_starts_connected_then_forwards_run_events() {
        let (tx, rx) = broadcast::channel(8);
        let stream = run_event_stream(rx);
        futures::pin_mut!(stream);

        assert!(stream.next().await.is_some());

        tx.send(RunEvent::RunCompleted {
            run_id: "run-1".to_string(),
            status: Status::Pass,
            summary: "1 passed, 0 failed, 0 errors".to_string(),
        })
        .expect("send");
        assert!(stream.next().await.is_some());

        drop(tx);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn run_events_serialize_for_sse() {
        let event = RunEvent::StoryCompleted {
            run_id: "run-1".to_string(),
            story_id: "s1".to_string(),
            status: Status::Fail,
        };
        assert!(to_sse(&event).is_some());
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["type"], "story_completed");
        assert_eq!(json["status"], "fail");
    }
}
