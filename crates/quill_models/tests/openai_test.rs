//! OpenAI-compatible driver against a loopback server.

use quill_core::{FinishReason, GenerateRequest, Message};
use quill_error::{ErrorCategory, GenerationErrorKind, QuillError, QuillErrorKind, RetryableError};
use quill_interface::GenerationDriver;
use quill_models::{LlmConfig, OpenAiCompatClient};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let lower = line.to_ascii_lowercase();
                    lower
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap())
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return text;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Answers one request with a canned response and returns the raw request.
async fn serve_once(status_line: &'static str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let body = body.to_string();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();
        request
    });
    (base, handle)
}

fn client(base_url: String, api_key: Option<&str>, timeout_secs: u64) -> OpenAiCompatClient {
    OpenAiCompatClient::new(LlmConfig {
        base_url,
        api_key: api_key.map(str::to_string),
        model: "tiny".into(),
        temperature: Some(0.2),
        max_tokens: Some(128),
        timeout_secs,
    })
    .unwrap()
}

fn request() -> GenerateRequest {
    GenerateRequest::new(vec![
        Message::system("Answer in one word."),
        Message::user("Colour of the harbor at night?"),
    ])
}

fn generation_kind(err: &QuillError) -> GenerationErrorKind {
    match err.kind() {
        QuillErrorKind::Generation(e) => e.kind.clone(),
        other => panic!("unexpected error {}", other),
    }
}

#[tokio::test]
async fn test_successful_completion() {
    let (base, server) = serve_once(
        "200 OK",
        r#"{"choices": [{"message": {"role": "assistant", "content": "Indigo"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 2, "total_tokens": 14}}"#,
    )
    .await;

    let response = client(base, Some("sk-test"), 5).generate(&request()).await.unwrap();

    assert_eq!(response.text, "Indigo");
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.usage.total_tokens, 14);

    let raw = server.await.unwrap();
    let lower = raw.to_ascii_lowercase();
    assert!(raw.starts_with("POST /v1/chat/completions"));
    assert!(lower.contains("authorization: bearer sk-test"));
    assert!(raw.contains(r#""model":"tiny""#));
    assert!(raw.contains(r#""max_tokens":128"#));
    assert!(raw.contains("Colour of the harbor at night?"));
}

#[tokio::test]
async fn test_no_key_sends_no_authorization() {
    let (base, server) = serve_once(
        "200 OK",
        r#"{"choices": [{"message": {"content": "{\"a\": 1"}, "finish_reason": "length"}]}"#,
    )
    .await;

    let response = client(base, None, 5).generate(&request()).await.unwrap();
    assert!(response.finish_reason.is_truncated());

    let raw = server.await.unwrap();
    assert!(!raw.to_ascii_lowercase().contains("authorization:"));
}

#[tokio::test]
async fn test_rate_limit_is_retryable() {
    let (base, _server) = serve_once(
        "429 Too Many Requests",
        r#"{"error": {"message": "slow down"}}"#,
    )
    .await;

    let err = client(base, Some("sk-test"), 5).generate(&request()).await.unwrap_err();

    assert_eq!(generation_kind(&err), GenerationErrorKind::RateLimited("slow down".into()));
    assert!(err.is_retryable());
    assert_eq!(err.category(), ErrorCategory::Unavailable);
}

#[tokio::test]
async fn test_rejected_key_is_not_retryable() {
    let (base, _server) = serve_once("401 Unauthorized", r#"{"error": {"message": "bad key"}}"#).await;

    let err = client(base, Some("sk-wrong"), 5).generate(&request()).await.unwrap_err();

    assert!(matches!(generation_kind(&err), GenerationErrorKind::MissingCredentials(_)));
    assert!(!err.is_retryable());
    assert_eq!(err.category(), ErrorCategory::Fault);
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let (base, _server) = serve_once("503 Service Unavailable", "upstream overloaded").await;

    let err = client(base, None, 5).generate(&request()).await.unwrap_err();

    assert_eq!(
        generation_kind(&err),
        GenerationErrorKind::Http {
            status: 503,
            message: "upstream overloaded".into()
        }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_garbage_body_is_malformed() {
    let (base, _server) = serve_once("200 OK", "<html>gateway</html>").await;

    let err = client(base, None, 5).generate(&request()).await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Malformed);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let _server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let err = client(base, None, 1).generate(&request()).await.unwrap_err();

    assert!(matches!(generation_kind(&err), GenerationErrorKind::Timeout(_)));
    assert_eq!(err.category(), ErrorCategory::Timeout);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_refused_connection_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = client(base, None, 5).generate(&request()).await.unwrap_err();

    assert!(matches!(generation_kind(&err), GenerationErrorKind::Unavailable(_)));
    assert!(err.is_retryable());
}
