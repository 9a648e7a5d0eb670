//! End-to-end: completion jobs against a local OpenAI-compatible SSE server.

use std::sync::{Arc, Mutex};

use chat_stream::chat::{CompletionJob, JobStatus, SamplingParams};
use chat_stream::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use chat_stream::llm::LlmProvider;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

fn params() -> SamplingParams {
    SamplingParams {
        model: "gpt-test".into(),
        max_tokens: 32,
        temperature: 0.5,
        top_p: 1.0,
        frequency_penalty: 0.0,
        presence_penalty: 0.0,
    }
}

fn delta(content: &str, finish: Option<&str>) -> String {
    let frame = serde_json::json!({
        "choices": [{ "index": 0, "delta": { "content": content }, "finish_reason": finish }]
    });
    format!("data: {frame}\n\n")
}

fn sse_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Read one HTTP request (headers + Content-Length body) and return it as text.
async fn read_request(sock: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = sock.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                return text;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Serve `response` verbatim to the first connection; yields the raw request.
async fn serve_once(response: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let request = read_request(&mut sock).await;
        sock.write_all(response.as_bytes()).await.unwrap();
        let _ = sock.shutdown().await;
        request
    });
    (format!("http://{addr}/v1/chat/completions"), handle)
}

fn provider(url: String, key: Option<&str>) -> LlmProvider {
    LlmProvider::OpenAiCompatible(
        OpenAiCompatibleProvider::new(url, 5, key.map(str::to_string)).unwrap(),
    )
}

#[tokio::test]
async fn streams_reply_into_one_segment() {
    let body = format!(
        "{}{}{}data: [DONE]\n\n",
        delta("Hello", None),
        delta(" world", Some("stop")),
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    );
    let (url, server) = serve_once(sse_response(&body)).await;

    let job = CompletionJob::new("Q: hi\nA:", "user-7", "user", params());
    let mut handle = job.submit(provider(url, Some("test-key")));
    let out = handle.wait().await.unwrap();

    assert_eq!(out.status, JobStatus::Completed);
    assert_eq!(out.segments, vec!["Hello world"]);
    assert_eq!(out.stop_reason.as_deref(), Some("stop"));

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /v1/chat/completions"));
    assert!(request.to_lowercase().contains("authorization: bearer test-key"));
    assert!(request.contains("\"stream\":true"));
    assert!(request.contains("\"user\":\"user-7\""));
    assert!(request.contains("\"model\":\"gpt-test\""));
    assert!(request.contains("\"role\":\"user\""));
}

#[tokio::test]
async fn long_reply_is_split_into_segments() {
    let body = format!("{}{}{}data: [DONE]\n\n", delta("abc", None), delta("de", None), delta("fgh", None));
    let (url, _server) = serve_once(sse_response(&body)).await;

    let out = CompletionJob::new("x", "u", "user", params())
        .with_max_chars_per_response(5)
        .process(&provider(url, None))
        .await;

    assert_eq!(out.status, JobStatus::Completed);
    assert_eq!(out.segments, vec!["abcde", "fgh"]);
}

#[tokio::test]
async fn http_error_goes_to_error_handler() {
    let body = r#"{"error":{"message":"bad key","code":"invalid_api_key"}}"#;
    let response = format!(
        "HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let (url, _server) = serve_once(response).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let out = CompletionJob::new("x", "u", "user", params())
        .with_error_handler(move |e| sink.lock().unwrap().push(e.to_string()))
        .process(&provider(url, Some("wrong")))
        .await;

    assert_eq!(out.status, JobStatus::Failed);
    assert!(out.segments.is_empty());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("401"), "{}", seen[0]);
    assert!(seen[0].contains("bad key"));
    assert!(seen[0].contains("invalid_api_key"));
}

#[tokio::test]
async fn truncated_body_keeps_partial_segments() {
    let body = delta("Hel", None);
    // Promise more bytes than are sent, then close the connection.
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len() + 100
    );
    let (url, _server) = serve_once(response).await;

    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);
    let out = CompletionJob::new("x", "u", "user", params())
        .with_error_handler(move |_| *counter.lock().unwrap() += 1)
        .process(&provider(url, None))
        .await;

    assert_eq!(out.status, JobStatus::Failed);
    assert_eq!(out.segments, vec!["Hel"]);
    assert!(out.error.is_some());
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn server_error_frame_fails_the_job() {
    let body = format!(
        "{}data: {{\"error\":{{\"message\":\"model overloaded\"}}}}\n\n",
        delta("partial", None)
    );
    let (url, _server) = serve_once(sse_response(&body)).await;

    let out = CompletionJob::new("x", "u", "user", params())
        .process(&provider(url, None))
        .await;

    assert_eq!(out.status, JobStatus::Failed);
    assert_eq!(out.segments, vec!["partial"]);
    let err = out.error.as_ref().unwrap().to_string();
    assert!(err.contains("model overloaded"));
}

#[tokio::test]
async fn ping_reaches_live_server() {
    let (url, server) = serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".into()).await;
    let provider = LlmProvider::OpenAiCompatible(OpenAiCompatibleProvider::new(url, 5, None).unwrap());
    assert!(provider.ping().await.is_ok());
    assert!(server.await.unwrap().starts_with("HEAD "));
}

#[tokio::test]
async fn ping_reports_refused_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let provider = LlmProvider::OpenAiCompatible(
        OpenAiCompatibleProvider::new(format!("http://{addr}/v1/chat/completions"), 5, None).unwrap(),
    );
    assert!(provider.ping().await.is_err());
}
