use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use rayport_rpc::Dispatcher;
use rayport_wire::RawFrame;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Accepts WebSocket clients until the listener fails.
pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer, dispatcher).await {
                log::warn!("server: connection failed peer={peer} err={err}");
            }
        });
    }
}

/// Runs one client: a reader feeding the dispatcher and a writer draining the
/// connection's outbound queue. Tears the connection down when the peer leaves.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let socket = tokio_tungstenite::accept_async(stream).await?;
    let (mut outgoing, mut incoming) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<RawFrame>();
    let connection = dispatcher.connect(Arc::new(tx));
    log::info!("[{}] client connected peer={peer}", connection.id());

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                RawFrame::Text(text) => WsMessage::Text(text),
                RawFrame::Binary(bytes) => WsMessage::Binary(bytes),
            };
            if let Err(err) = outgoing.send(message).await {
                log::debug!("server: write failed peer={peer} err={err}");
                break;
            }
        }
        let _ = outgoing.close().await;
    });

    while let Some(message) = incoming.next().await {
        match message {
            Ok(WsMessage::Text(text)) => dispatcher.on_frame(&connection, RawFrame::Text(text)),
            Ok(WsMessage::Binary(bytes)) => {
                dispatcher.on_frame(&connection, RawFrame::Binary(bytes));
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                log::warn!("[{}] read failed peer={peer} err={err}", connection.id());
                break;
            }
        }
    }

    let cancelled = dispatcher.disconnect(&connection);
    writer.abort();
    log::info!("[{}] client disconnected peer={peer} cancelled_tasks={cancelled}", connection.id());
    Ok(())
}
