use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rayport_daemon::config::EngineConfig;
use rayport_daemon::engine::{Engine, MemoryEngine};
use rayport_daemon::entrypoints::build_dispatcher;
use rayport_daemon::server;
use rayport_wire::{codes, decode, encode, Frame, RawFrame, Reply, RequestId};
use serde_json::{json, Value as JsonValue};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn next_reply(socket: &mut Socket) -> Reply {
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("reply in time")
            .expect("socket open")
            .expect("read");
        let raw = match message {
            WsMessage::Text(text) => RawFrame::Text(text),
            WsMessage::Binary(bytes) => RawFrame::Binary(bytes),
            _ => continue,
        };
        return Reply::parse(decode(raw).expect("decode")).expect("reply");
    }
}

async fn terminal_reply(socket: &mut Socket) -> Reply {
    loop {
        let reply = next_reply(socket).await;
        if reply.is_terminal() {
            return reply;
        }
    }
}

#[tokio::test]
async fn serves_text_and_binary_frames_over_websocket() {
    let config = EngineConfig::default();
    let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new(&config));
    let dispatcher = Arc::new(build_dispatcher(engine, &config));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(server::serve(listener, Arc::clone(&dispatcher)));

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}")).await.expect("connect");

    let request = json!({"jsonrpc": "2.0", "id": 1, "method": "getVersion"});
    socket.send(WsMessage::Text(request.to_string())).await.expect("send");
    match next_reply(&mut socket).await {
        Reply::Result { id, payload } => {
            assert_eq!(id, RequestId::Integer(1));
            assert_eq!(payload.json["name"], json!("rayport"));
        }
        other => panic!("unexpected reply {other:?}"),
    }

    let upload = encode(Frame::new(JsonValue::Null, b"cube".to_vec())).expect("encode");
    let RawFrame::Binary(upload) = upload else {
        panic!("upload should be a binary frame");
    };
    socket.send(WsMessage::Binary(upload)).await.expect("send upload");
    let request =
        json!({"jsonrpc": "2.0", "id": 2, "method": "uploadModel", "params": {"name": "cube"}});
    socket.send(WsMessage::Text(request.to_string())).await.expect("send");
    match terminal_reply(&mut socket).await {
        Reply::Result { id, payload } => {
            assert_eq!(id, RequestId::Integer(2));
            assert_eq!(payload.json["sizeBytes"], json!(4));
        }
        other => panic!("unexpected reply {other:?}"),
    }

    let params = json!({"width": 16, "height": 8});
    let request = json!({"jsonrpc": "2.0", "id": 3, "method": "snapshot", "params": params});
    socket.send(WsMessage::Text(request.to_string())).await.expect("send");
    match terminal_reply(&mut socket).await {
        Reply::Result { payload, .. } => {
            assert_eq!(payload.json["format"], json!("ppm"));
            assert!(payload.binary.starts_with(b"P6\n16 8\n255\n"));
        }
        other => panic!("unexpected reply {other:?}"),
    }

    socket.send(WsMessage::Binary(vec![0xff, 0xff, 0xff, 0xff])).await.expect("send garbage");
    let request = json!({"jsonrpc": "2.0", "id": 4, "method": "nope"});
    socket.send(WsMessage::Text(request.to_string())).await.expect("send");
    match next_reply(&mut socket).await {
        Reply::Error { id, error } => {
            assert_eq!(id, RequestId::Integer(4));
            assert_eq!(error.code, codes::METHOD_NOT_FOUND);
        }
        other => panic!("unexpected reply {other:?}"),
    }

    socket.close(None).await.expect("close");
    server.abort();
    assert!(dispatcher.tasks().is_empty());
}
