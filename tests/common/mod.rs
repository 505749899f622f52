//! Test helpers: a scripted chat-completions server.
//!
//! Serves one canned SSE completion per incoming connection, in order.
//! Lets interrogator tests drive the full loop without a real provider.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Start a server that answers the n-th request with the n-th scripted
/// completion (a list of SSE `data:` payloads). Returns its base URL.
pub async fn scripted_llm_server(completions: Vec<Vec<String>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let completions = Arc::new(completions);

    tokio::spawn(async move {
        let mut served = 0usize;
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let script = completions.get(served).cloned().unwrap_or_default();
            served += 1;

            tokio::spawn(async move {
                read_request(&mut socket).await;

                let mut body = String::new();
                for data in &script {
                    body.push_str(&format!("data: {data}\n\n"));
                }
                body.push_str("data: [DONE]\n\n");

                let response = format!(
                    "HTTP/1.1 200 OK\r\n\
                     Content-Type: text/event-stream\r\n\
                     Content-Length: {}\r\n\
                     Connection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}/v1")
}

/// Drain one HTTP request (headers plus content-length body).
async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        match socket.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = find_header_end(&buf) {
                    break pos;
                }
            }
            Err(_) => return,
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_read = buf.len() - (header_end + 4);
    while body_read < content_length {
        match socket.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => body_read += n,
            Err(_) => return,
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Shorthand for one OpenAI-style text delta chunk
pub fn text_chunk(text: &str) -> String {
    serde_json::json!({
        "choices": [{ "delta": { "content": text } }]
    })
    .to_string()
}
