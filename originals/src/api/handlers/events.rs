use crate::AppState;
use crate::api::models::nodes::{NodeRemoved, NodeResponse};
use crate::auth::permissions::{RequiresCapability, capability};
use crate::nodes::notifier::{NodeEvent, NodeEventType};
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use tokio::sync::broadcast;
use tokio_stream::{
    Stream, StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tracing::{debug, warn};

/// Event name and JSON payload sent to viewers for a registry change
fn event_payload(event: NodeEvent) -> (NodeEventType, serde_json::Value) {
    let event_type = event.event_type();
    let payload = match event {
        NodeEvent::Updated(node) => serde_json::to_value(NodeResponse::from(node)),
        NodeEvent::Removed(id) => serde_json::to_value(NodeRemoved { id }),
    };
    (event_type, payload.unwrap_or(serde_json::Value::Null))
}

/// Registry changes as `(event name, payload)` pairs. Events a lagging subscriber missed are skipped.
fn payload_stream(
    receiver: broadcast::Receiver<NodeEvent>,
) -> impl Stream<Item = (NodeEventType, serde_json::Value)> {
    BroadcastStream::new(receiver).filter_map(|item| match item {
        Ok(event) => Some(event_payload(event)),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "Node event subscriber lagged, events dropped");
            None
        }
    })
}

#[utoipa::path(
    get,
    path = "/api/nodes/events",
    tag = "nodes",
    summary = "Stream node changes",
    description = "Server-Sent Events stream of `node_update` (full node) and `node_removed` (`{id}`) events. \
                   Delivery is best effort; list nodes to recover full state.",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - node_management required"),
    ),
    security(("X-Originals-User" = []))
)]
#[tracing::instrument(skip_all, fields(username = %auth.user.username))]
pub async fn node_events(
    State(state): State<AppState>,
    auth: RequiresCapability<capability::NodeManagement>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Viewer subscribed to node events");
    let stream = payload_stream(state.registry.subscribe()).map(|(event_type, payload)| {
        let event = Event::default().event(event_type.to_string());
        Ok(event.json_data(&payload).unwrap_or_else(|_| Event::default().comment("unserializable event")))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::db::models::nodes::tests::online_node;
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use std::pin::pin;

    #[test]
    fn test_update_payload_is_full_node() {
        let node = online_node();
        let (event_type, payload) = event_payload(NodeEvent::Updated(node.clone()));

        assert_eq!(event_type, NodeEventType::NodeUpdate);
        assert_eq!(payload["id"], node.id.to_string());
        assert_eq!(payload["status"], "online");
        assert_eq!(payload["connection_string"], "http://192.168.1.20:3000");
    }

    #[test]
    fn test_removed_payload_is_id_only() {
        let id = uuid::Uuid::new_v4();
        let (event_type, payload) = event_payload(NodeEvent::Removed(id));

        assert_eq!(event_type, NodeEventType::NodeRemoved);
        assert_eq!(payload, serde_json::json!({"id": id.to_string()}));
    }

    #[tokio::test]
    async fn test_lagging_viewer_skips_missed_events() {
        let (sender, receiver) = broadcast::channel(2);
        let mut stream = pin!(payload_stream(receiver));

        let ids: Vec<_> = (0..4).map(|_| uuid::Uuid::new_v4()).collect();
        for id in &ids {
            sender.send(NodeEvent::Removed(*id)).unwrap();
        }
        drop(sender);

        let mut received = Vec::new();
        while let Some((_, payload)) = stream.next().await {
            received.push(payload["id"].as_str().unwrap().to_string());
        }
        // Only the newest events within capacity survive
        assert_eq!(received, vec![ids[2].to_string(), ids[3].to_string()]);
    }

    #[test_log::test(tokio::test)]
    async fn test_events_require_node_management() {
        let (app, _state) = create_test_app();

        app.get("/api/nodes/events").await.assert_status(StatusCode::UNAUTHORIZED);

        let headers = add_auth_headers("alex", Role::User);
        app.get("/api/nodes/events")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
