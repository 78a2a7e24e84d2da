use actix_web::{web, Error, HttpRequest, Responder};
use actix_ws::Message;
use futures_util::StreamExt;
use log::{debug, info};
use std::sync::Arc;

use crate::ws::Broadcaster;

/// GET /api/ws: subscribe to live-capture broadcasts.
///
/// Inbound text frames are echoed back; everything the coordinator has to
/// say arrives as broadcast frames.
pub async fn ws_index(
    req: HttpRequest,
    body: web::Payload,
    broadcaster: web::Data<Arc<Broadcaster>>,
) -> Result<impl Responder, Error> {
    let peer = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("WebSocket connection from {}", peer);

    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;
    let (id, mut rx) = broadcaster.subscribe();
    let broadcaster = broadcaster.into_inner();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                broadcastmsg = rx.recv() => {
                    match broadcastmsg {
                        Some(text) => {
                            if session.text(text).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                frame = msg_stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            debug!("WebSocket echo: {}", text);
                            if session.text(text).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(bytes))) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => break,
                    }
                }
            }
        }

        broadcaster.remove(id);
        let _ = session.close(None).await;
        info!("WebSocket connection closed: {}", peer);
    });

    Ok(response)
}
