use std::time::Duration;

use memchat::ai::{Inference, InferenceClient};
use memchat::errors::ChatError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serves exactly one HTTP response and hands back the raw request it received.
async fn serve_once(status: &'static str, content_type: &'static str, body: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;

        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        request
    });

    (url, handle)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&raw);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if raw.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&raw).into_owned()
}

fn client(url: String) -> InferenceClient {
    InferenceClient::new(url, "tgi".to_string(), Duration::from_secs(5), false).unwrap()
}

#[tokio::test]
async fn test_infer_single_envelope() {
    let (url, server) = serve_once(
        "200 OK",
        "application/json",
        r#"{"choices":[{"message":{"role":"assistant","content":"hello world"}}]}"#.to_string(),
    )
    .await;

    let text = client(url).infer("Summarize please", 150).await.unwrap();
    assert_eq!(text, "hello world");

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /v1/chat/completions"));
    let body: serde_json::Value =
        serde_json::from_str(request.split_once("\r\n\r\n").unwrap().1).unwrap();
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "Summarize please");
    assert_eq!(body["max_tokens"], 150);
    assert_eq!(body["stream"], false);
}

#[tokio::test]
async fn test_infer_chunked_envelope_despite_stream_disabled() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"world\"}}]}\n\n",
    );
    let (url, _server) = serve_once("200 OK", "text/event-stream", body.to_string()).await;

    let text = client(url).infer("prompt", 50).await.unwrap();
    assert_eq!(text, "hello world");
}

#[tokio::test]
async fn test_infer_error_status_is_unavailable() {
    let (url, _server) = serve_once(
        "503 Service Unavailable",
        "application/json",
        r#"{"error":"Failed to contact Hugging Face API"}"#.to_string(),
    )
    .await;

    match client(url).infer("prompt", 50).await {
        Err(ChatError::InferenceUnavailable { status, body }) => {
            assert_eq!(status, 503);
            assert!(body.contains("Failed to contact"));
        }
        other => panic!("expected InferenceUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_infer_malformed_body() {
    let (url, _server) =
        serve_once("200 OK", "text/html", "<html>gateway</html>".to_string()).await;

    let err = client(url).infer("prompt", 50).await.unwrap_err();
    assert!(matches!(err, ChatError::InferenceMalformed(_)));
}

#[tokio::test]
async fn test_infer_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());
    drop(listener);

    let err = client(url).infer("prompt", 50).await.unwrap_err();
    assert!(matches!(err, ChatError::InferenceUnreachable(_)));
    assert!(err.to_string().starts_with("Failed to reach inference endpoint"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_infer_timeout_is_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());
    let _server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        // Hold the connection open without answering.
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(socket);
    });

    let client =
        InferenceClient::new(url, "tgi".to_string(), Duration::from_millis(200), false).unwrap();
    let err = client.infer("prompt", 50).await.unwrap_err();
    assert!(matches!(err, ChatError::InferenceUnreachable(_)));
}
