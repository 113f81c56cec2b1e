//! End-to-end delivery through the builder, queue and built-in receivers.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};
use logrelay::{Level, QueueHandlerBuilder};
use rstest::{fixture, rstest};
use serde_json::Value;

const WAIT: Duration = Duration::from_secs(5);

/// Accept connections forever, answering each request with 200 and passing
/// its JSON body on.
fn spawn_collector(listener: TcpListener) -> Receiver<Value> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                let line = line.trim();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
            }
            let mut body = vec![0u8; content_length];
            if reader.read_exact(&mut body).is_err() {
                continue;
            }
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            if let Ok(value) = serde_json::from_slice(&body) {
                let _ = tx.send(value);
            }
        }
    });
    rx
}

fn messages(document: &Value) -> Vec<String> {
    document["logs"]
        .as_array()
        .expect("logs array")
        .iter()
        .map(|log| log["msg"].as_str().expect("msg").to_owned())
        .collect()
}

#[fixture]
fn tcp_listener() -> TcpListener {
    TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener")
}

#[rstest]
fn trigger_record_carries_earlier_debug_records(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("address");
    let bodies = spawn_collector(tcp_listener);
    let handler = QueueHandlerBuilder::new()
        .with_http_target(format!("http://{addr}/v1/logs"))
        .with_common_attr("service", "checkout")
        .with_backoff_base_ms(1)
        .build()
        .expect("build handler");

    handler.log(Level::Debug, "A");
    handler.log(Level::Debug, "B");
    assert!(bodies.recv_timeout(Duration::from_millis(50)).is_err());

    handler.log(Level::Info, "C");
    let document = bodies.recv_timeout(WAIT).expect("one POST");
    assert_eq!(messages(&document), ["A", "B", "C"]);
    assert_eq!(document["logs"][0]["service"], "checkout");
    assert_eq!(document["logs"][0]["event"], "rust.log");
    assert_eq!(document["logs"][2]["level"], "INFO");
}

#[rstest]
fn close_flushes_to_the_collector(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("address");
    let bodies = spawn_collector(tcp_listener);
    let handler = QueueHandlerBuilder::new()
        .with_http_target(format!("http://{addr}/v1/logs"))
        .build()
        .expect("build handler");

    handler.log(Level::Trace, "shutting down");
    handler.close();

    let document = bodies.recv_timeout(WAIT).expect("final POST");
    assert_eq!(messages(&document), ["shutting down"]);
}

#[cfg(unix)]
#[rstest]
fn local_agent_receives_each_record_as_a_packet() {
    use logrelay::agent::{PacketIo, PacketType};
    use std::os::unix::net::UnixListener;

    let dir = tempfile::tempdir().expect("socket dir");
    let path = dir.path().join("logagent.sock");
    let listener = UnixListener::bind(&path).expect("bind agent socket");
    let agent = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        (0..3)
            .map(|_| stream.recv_packet().expect("packet"))
            .collect::<Vec<_>>()
    });

    let handler = QueueHandlerBuilder::new()
        .with_agent_paths([dir.path().join("missing.sock"), path])
        .build()
        .expect("build handler");
    handler.log(Level::Debug, "one");
    handler.log(Level::Debug, "two");
    handler.log(Level::Warn, "three");

    let packets = agent.join().expect("agent thread");
    let received: Vec<String> = packets
        .iter()
        .map(|packet| {
            assert_eq!(packet.kind, PacketType::LOG_JSON);
            let value: Value = serde_json::from_slice(&packet.data).expect("json record");
            value["msg"].as_str().expect("msg").to_owned()
        })
        .collect();
    assert_eq!(received, ["one", "two", "three"]);
    assert!(handler.flush());
}
