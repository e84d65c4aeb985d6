//! End-to-end protocol scenarios over real sockets: a gateway bound to an
//! ephemeral port, driven by the crate's own client or by a raw WebSocket
//! where the scenario needs to observe close codes.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use promptnet::{EchoProducer, GatewayClient, GatewayConfig, GatewayError, GatewayServer};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &str = "sk-test-secret";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_gateway(auth_timeout: Duration) -> String {
    let config = GatewayConfig::new("127.0.0.1:0")
        .with_secret(SECRET)
        .with_auth_timeout(auth_timeout);
    let mut server =
        GatewayServer::new(config).with_producer(Arc::new(EchoProducer::new(Duration::ZERO)));
    let listener = server.bind().await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.serve(listener).await });
    format!("ws://{addr}/llm/ws")
}

#[tokio::test]
async fn authenticate_then_stream() {
    let url = start_gateway(TEST_TIMEOUT).await;

    let mut client = GatewayClient::connect(&url).await.unwrap();
    client.authenticate(SECRET).await.unwrap();

    let fragments = tokio::time::timeout(TEST_TIMEOUT, client.request("hi"))
        .await
        .unwrap()
        .unwrap();

    assert!(!fragments.is_empty());
    assert!(fragments.iter().all(|f| f.chars().count() == 1));
    assert_eq!(
        fragments.concat(),
        "This is a simulated response from the LLM. You said: hi"
    );
}

#[tokio::test]
async fn two_sequential_prompts_two_complete_streams() {
    let url = start_gateway(TEST_TIMEOUT).await;

    let mut client = GatewayClient::connect(&url).await.unwrap();
    client.authenticate(SECRET).await.unwrap();

    let first = client.request("one").await.unwrap();
    let second = client.request("two").await.unwrap();

    assert!(first.concat().ends_with("You said: one"));
    assert!(second.concat().ends_with("You said: two"));
}

#[tokio::test]
async fn wrong_token_gets_error_then_close() {
    let url = start_gateway(TEST_TIMEOUT).await;

    let mut client = GatewayClient::connect(&url).await.unwrap();
    let err = client.authenticate("wrong").await.unwrap_err();
    match err {
        GatewayError::ServerError(message) => assert_eq!(message, "Authentication failed"),
        other => panic!("expected server error, got {other}"),
    }

    // The connection is gone; further requests cannot complete.
    assert!(client.request("hi").await.is_err());
}

#[tokio::test]
async fn auth_timeout_closes_with_policy_violation_and_no_data() {
    let url = start_gateway(Duration::from_millis(300)).await;

    let (mut ws, _) = connect_async(&url).await.unwrap();

    // Send nothing and outwait the handshake window.
    let mut data_frames = 0;
    let close_frame = loop {
        let frame = tokio::time::timeout(TEST_TIMEOUT, ws.next())
            .await
            .expect("server should close the connection");
        match frame {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(_)) => data_frames += 1,
            Some(Err(_)) | None => break None,
        }
    };

    assert_eq!(data_frames, 0);
    let frame = close_frame.expect("close frame should carry a code");
    assert_eq!(frame.code, CloseCode::Policy);
}

#[tokio::test]
async fn empty_prompt_is_recoverable_on_a_live_connection() {
    let url = start_gateway(TEST_TIMEOUT).await;

    let (mut ws, _) = connect_async(&url).await.unwrap();
    ws.send(Message::text(format!(r#"{{"token":"{SECRET}"}}"#)))
        .await
        .unwrap();
    assert_eq!(next_text(&mut ws).await.unwrap(), r#"{"status":"authenticated"}"#);

    ws.send(Message::text(r#"{"prompt":""}"#)).await.unwrap();
    assert_eq!(next_text(&mut ws).await.unwrap(), r#"{"error":"Prompt is required"}"#);

    // Same connection still serves a valid prompt afterwards.
    ws.send(Message::text(r#"{"prompt":"ok"}"#)).await.unwrap();
    let mut tokens = String::new();
    loop {
        let frame = next_text(&mut ws).await.unwrap();
        if frame == r#"{"status":"done"}"# {
            break;
        }
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        tokens.push_str(parsed["token"].as_str().unwrap());
    }
    assert!(tokens.ends_with("You said: ok"));
}

#[tokio::test]
async fn failing_session_does_not_affect_siblings() {
    let url = start_gateway(TEST_TIMEOUT).await;

    let mut healthy = GatewayClient::connect(&url).await.unwrap();
    healthy.authenticate(SECRET).await.unwrap();

    // A sibling connection violates the handshake and gets dropped.
    let mut failing = GatewayClient::connect(&url).await.unwrap();
    assert!(failing.authenticate("wrong").await.is_err());

    // The healthy session is untouched.
    let fragments = healthy.request("still here").await.unwrap();
    assert!(fragments.concat().ends_with("You said: still here"));
    healthy.close().await.unwrap();
}

async fn next_text(ws: &mut WsStream) -> Option<String> {
    loop {
        let frame = tokio::time::timeout(TEST_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")?;
        match frame {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}
