//! Tests for the HTTP and agent receivers.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};

use super::http::classify_status;
use super::{Batch, DeliveryError, HttpReceiver, HttpReceiverConfig, LogReceiver, RetryPolicy};
use crate::level::Level;
use crate::log_record::LogRecord;

#[derive(Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        429 => "Too Many Requests",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn read_http_request(stream: &mut TcpStream) -> CapturedRequest {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .expect("read request line");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read header");
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let (key, value) = (key.trim().to_lowercase(), value.trim().to_string());
        if key == "content-length" {
            content_length = value.parse().unwrap_or(0);
        }
        headers.push((key, value));
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("read body");
    CapturedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

/// Answer one request per entry in `statuses`, then stop accepting.
fn spawn_server(
    listener: TcpListener,
    statuses: Vec<u16>,
) -> (SocketAddr, mpsc::Receiver<CapturedRequest>) {
    let addr = listener.local_addr().expect("listener has address");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for status in statuses {
            let Ok((mut stream, _)) = listener.accept() else {
                break;
            };
            let captured = read_http_request(&mut stream);
            let response = format!(
                "HTTP/1.1 {status} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status_text(status)
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = tx.send(captured);
        }
    });
    (addr, rx)
}

#[fixture]
fn tcp_listener() -> TcpListener {
    TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener")
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base: Duration::from_millis(1),
    }
}

fn receiver_for(addr: SocketAddr) -> HttpReceiver {
    let mut config = HttpReceiverConfig::new(format!("http://{addr}/logs"));
    config.headers.push(("X-Api-Key".into(), "secret".into()));
    config.retry = fast_retry();
    HttpReceiver::new(config).expect("build http receiver")
}

fn batch(messages: &[&str]) -> Batch {
    messages
        .iter()
        .map(|msg| LogRecord::new(Level::Info, msg))
        .collect()
}

#[rstest]
fn posts_batch_as_logs_document(tcp_listener: TcpListener) {
    let (addr, rx) = spawn_server(tcp_listener, vec![200]);
    let receiver = receiver_for(addr);

    receiver
        .process_logs(batch(&["first", "second"]))
        .expect("delivery succeeds");

    let request = rx.recv_timeout(Duration::from_secs(5)).expect("request");
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/logs");
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.header("x-api-key"), Some("secret"));

    let body: serde_json::Value = serde_json::from_str(&request.body).expect("json body");
    let logs = body["logs"].as_array().expect("logs array");
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["msg"], "first");
    assert_eq!(logs[1]["msg"], "second");
    assert_eq!(logs[0]["level"], "INFO");
    assert!(logs[0]["time"].is_string());
}

#[rstest]
fn transient_status_is_retried(tcp_listener: TcpListener) {
    let (addr, rx) = spawn_server(tcp_listener, vec![503, 429, 200]);
    let receiver = receiver_for(addr);

    receiver
        .process_logs(batch(&["retry me"]))
        .expect("third attempt succeeds");

    let bodies: Vec<String> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).expect("request").body)
        .collect();
    assert!(bodies.windows(2).all(|w| w[0] == w[1]));
}

#[rstest]
fn client_error_is_not_retried(tcp_listener: TcpListener) {
    let (addr, rx) = spawn_server(tcp_listener, vec![400, 200]);
    let receiver = receiver_for(addr);

    let err = receiver
        .process_logs(batch(&["rejected"]))
        .expect_err("400 is permanent");
    assert!(matches!(err, DeliveryError::Status { status: 400, retryable: false }));
    rx.recv_timeout(Duration::from_secs(5)).expect("first request");
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[rstest]
fn unreachable_collector_exhausts_retries(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("address");
    drop(tcp_listener);
    let receiver = receiver_for(addr);

    let err = receiver
        .process_logs(batch(&["nobody home"]))
        .expect_err("connection refused");
    assert!(matches!(err, DeliveryError::RetriesExhausted { attempts: 3, .. }));
}

#[rstest]
fn empty_batch_sends_nothing(tcp_listener: TcpListener) {
    let (addr, rx) = spawn_server(tcp_listener, vec![200]);
    let receiver = receiver_for(addr);
    receiver.process_logs(Vec::new()).expect("no-op");
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[rstest]
#[case(400, false)]
#[case(404, false)]
#[case(429, true)]
#[case(500, true)]
#[case(503, true)]
fn status_classification(#[case] status: u16, #[case] retryable: bool) {
    assert_eq!(classify_status(status).is_retryable(), retryable);
}

#[rstest]
fn closures_are_receivers() {
    let receiver = |batch: Batch| {
        if batch.len() == 1 {
            Ok(())
        } else {
            Err(DeliveryError::Transport("wrong size".into()))
        }
    };
    assert!(receiver.process_logs(batch(&["one"])).is_ok());
    assert!(receiver.process_logs(batch(&["a", "b"])).is_err());
}

#[cfg(unix)]
mod agent {
    use std::fs::File;
    use std::os::unix::net::UnixListener;
    use std::sync::Arc;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;
    use crate::agent::{AgentConnection, MAX_DATA_LEN, Packet, PacketIo, PacketType};
    use crate::receiver::AgentReceiver;

    #[fixture]
    fn socket_dir() -> TempDir {
        tempfile::tempdir().expect("create socket dir")
    }

    fn receiver_at(dir: &TempDir) -> (AgentReceiver, UnixListener) {
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        let connection = Arc::new(AgentConnection::with_paths(vec![path]));
        (AgentReceiver::new(connection, fast_retry()), listener)
    }

    #[rstest]
    fn forwards_one_packet_per_record(socket_dir: TempDir) {
        let (receiver, listener) = receiver_at(&socket_dir);
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            (0..2)
                .map(|_| stream.recv_packet().expect("recv"))
                .collect::<Vec<_>>()
        });

        receiver
            .process_logs(batch(&["alpha", "beta"]))
            .expect("delivered");

        let packets = server.join().expect("server thread");
        let messages: Vec<String> = packets
            .iter()
            .map(|p| {
                assert_eq!(p.kind, PacketType::LOG_JSON);
                let value: serde_json::Value = serde_json::from_slice(&p.data).expect("json");
                value["msg"].as_str().expect("msg").to_string()
            })
            .collect();
        assert_eq!(messages, ["alpha", "beta"]);
        assert!(receiver.connection().is_connected());
    }

    #[rstest]
    fn oversized_record_is_skipped(socket_dir: TempDir) {
        let (receiver, listener) = receiver_at(&socket_dir);
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream.recv_packet().expect("recv")
        });

        let huge = "x".repeat(MAX_DATA_LEN + 1);
        receiver
            .process_logs(batch(&[huge.as_str(), "small"]))
            .expect("oversized record does not fail the batch");

        let packet = server.join().expect("server thread");
        let value: serde_json::Value = serde_json::from_slice(&packet.data).expect("json");
        assert_eq!(value["msg"], "small");
    }

    #[rstest]
    fn set_info_sends_process_metadata(socket_dir: TempDir) {
        let (receiver, listener) = receiver_at(&socket_dir);
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream.recv_packet().expect("recv")
        });

        receiver
            .set_info(&serde_json::json!({"name": "billing", "pid": 42}))
            .expect("set info");
        let packet = server.join().expect("server thread");
        assert_eq!(packet.kind, PacketType::SET_INFO);
        let value: serde_json::Value = serde_json::from_slice(&packet.data).expect("json");
        assert_eq!(value["name"], "billing");
    }

    #[rstest]
    fn logfile_returns_descriptor_from_agent(socket_dir: TempDir) {
        let (receiver, listener) = receiver_at(&socket_dir);
        let scratch = socket_dir.path().join("captured.log");
        let server_path = scratch.clone();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let request = stream.recv_packet().expect("recv request");
            let file = File::create(&server_path).expect("create capture file");
            let reply = Packet::new(PacketType::PIPE_RESPONSE, Vec::new())
                .with_files(vec![file.into()]);
            stream.send_packet(&reply).expect("send reply");
            request
        });

        let mut file = receiver.logfile("stdout").expect("logfile");
        let request = server.join().expect("server thread");
        assert_eq!(request.kind, PacketType::PIPE_REQUEST);
        let value: serde_json::Value = serde_json::from_slice(&request.data).expect("json");
        assert_eq!(value["name"], "stdout");

        file.write_all(b"child output").expect("write through passed fd");
        drop(file);
        assert_eq!(
            std::fs::read_to_string(&scratch).expect("read capture"),
            "child output"
        );
    }

    #[rstest]
    fn logfile_without_descriptor_is_rejected(socket_dir: TempDir) {
        let (receiver, listener) = receiver_at(&socket_dir);
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream.recv_packet().expect("recv request");
            stream
                .send_packet(&Packet::new(PacketType::PIPE_RESPONSE, Vec::new()))
                .expect("send reply");
        });

        let err = receiver.logfile("stderr").expect_err("no descriptor");
        server.join().expect("server thread");
        assert!(matches!(
            err,
            DeliveryError::Packet(crate::agent::PacketError::FileCountMismatch { received: 0, .. })
        ));
        assert!(!receiver.connection().is_connected());
    }

    #[rstest]
    fn missing_agent_exhausts_retries(socket_dir: TempDir) {
        let connection = Arc::new(AgentConnection::with_paths(vec![
            socket_dir.path().join("absent.sock"),
        ]));
        let receiver = AgentReceiver::new(connection, fast_retry());
        let err = receiver
            .process_logs(batch(&["lost"]))
            .expect_err("no agent");
        assert!(matches!(err, DeliveryError::RetriesExhausted { attempts: 3, .. }));
    }
}
