//! SSE subscription handler

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use log::{debug, info, warn};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::core::ServerCore;

/// Subscribe to calculated column changes via SSE
///
/// Events:
/// - `columns` immediately, with the current calculated column names
/// - `changed` with the names of the columns whose results or definitions changed
/// - `lagged` when notifications were dropped; clients should reload everything
#[utoipa::path(
    get,
    path = "/subscribe",
    responses(
        (status = 200, description = "SSE stream of changed column names")
    )
)]
pub async fn subscribe(
    State(core): State<Arc<ServerCore>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    info!("GET /subscribe");
    let update_rx = core.subscribe_updates();
    let current = core.columns().await.calculated;

    let initial = stream::once(async move { Event::default().event("columns").json_data(current) });
    let updates = BroadcastStream::new(update_rx).map(|update| match update {
        Ok(columns) => {
            debug!("SSE changed: {:?}", columns);
            Event::default().event("changed").json_data(columns)
        }
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            warn!("SSE subscriber lagged, {} notifications dropped", missed);
            Ok(Event::default().event("lagged").data(missed.to_string()))
        }
    });

    Sse::new(initial.chain(updates))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(30)))
}
