/// WebSocket gateway for the realtime subsystem.
///
/// Accepts the upgrade, wires the connection into the event engine and runs
/// two tasks per connection: a writer draining the outbound queue into the
/// socket, and a read loop decoding inbound frames and dispatching them in
/// arrival order.
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_ws::Message as WsMessage;
use futures::stream::StreamExt;
use serde_json::json;

use crate::realtime::events::ClientEvent;
use crate::realtime::manager::SocketManager;
use crate::AppState;

pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    let sid = SocketManager::generate_sid();
    tracing::info!("WebSocket connection established: {}", sid);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let events = state.events.clone();
    events.register_connection(&sid, tx).await;

    // Writer: drains the outbound queue into the socket. Ends when the
    // engine drops the sender or the socket goes away.
    let mut writer_session = session.clone();
    actix_web::rt::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer_session.text(frame).await.is_err() {
                break;
            }
        }
    });

    // Reader: decodes inbound frames and dispatches them sequentially, so
    // events from one connection are always handled in arrival order.
    actix_web::rt::spawn(async move {
        while let Some(Ok(msg)) = msg_stream.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        events.dispatch(&sid, event).await;
                    }
                    Err(e) => {
                        // A malformed frame never tears down the connection
                        tracing::warn!("Unparseable frame on {}: {}", sid, e);
                        let error_msg = json!({
                            "event": "message-error",
                            "data": format!("Invalid event: {}", e)
                        })
                        .to_string();
                        let _ = session.text(error_msg).await;
                    }
                },
                WsMessage::Ping(bytes) => {
                    let _ = session.pong(&bytes).await;
                }
                WsMessage::Close(reason) => {
                    tracing::info!("WebSocket close on {}: {:?}", sid, reason);
                    let _ = session.close(reason).await;
                    break;
                }
                _ => {}
            }
        }

        events.handle_disconnect(&sid).await;
        tracing::info!("WebSocket connection closed: {}", sid);
    });

    Ok(response)
}
