#![deny(rust_2018_idioms)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use foxhole::handler::handler_fn;
use foxhole::{Endpoint, Handler, Logger, NotHandled, Response, Server, StatusCode};

#[tokio::test]
async fn routes_dispatch_first_match_and_404() {
    let server = Server::bind(Endpoint::ip4([127, 0, 0, 1], 0));
    server.append_route("GET /accepted", status_handler(StatusCode::ACCEPTED));
    server.append_route("GET /gone", status_handler(StatusCode::GONE));
    let (addr, task) = spawn(&server).await;

    let res = get(addr, "/accepted").await;
    assert!(res.starts_with("HTTP/1.1 202 Accepted\r\n"), "{:?}", res);

    let res = get(addr, "/gone").await;
    assert!(res.starts_with("HTTP/1.1 410 Gone\r\n"), "{:?}", res);

    let res = get(addr, "/missing").await;
    assert!(res.starts_with("HTTP/1.1 404 Not Found\r\n"), "{:?}", res);

    server.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn failing_handler_answers_500() {
    let server = Server::bind(Endpoint::ip4([127, 0, 0, 1], 0));
    server.append_route(
        "/x",
        handler_fn(|_req| async { Err::<Response<Bytes>, _>("handler exploded") }),
    );
    let (addr, task) = spawn(&server).await;

    let res = get(addr, "/x").await;
    assert!(
        res.starts_with("HTTP/1.1 500 Internal Server Error\r\n"),
        "{:?}",
        res
    );

    server.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn slow_handler_hits_deadline() {
    let server = Server::builder()
        .address(Endpoint::ip4([127, 0, 0, 1], 0))
        .timeout(Duration::from_millis(100))
        .build();
    server.append_route(
        "/x",
        handler_fn(|_req| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, foxhole::Error>(Response::new(Bytes::new()))
        }),
    );
    let (addr, task) = spawn(&server).await;

    let begin = Instant::now();
    let res = get(addr, "/x").await;
    assert!(
        res.starts_with("HTTP/1.1 500 Internal Server Error\r\n"),
        "{:?}",
        res
    );
    assert!(
        begin.elapsed() < Duration::from_millis(900),
        "deadline took {:?}",
        begin.elapsed()
    );

    server.stop();
    task.await.unwrap().unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn serves_on_unix_socket() {
    let path = std::env::temp_dir().join(format!("foxsocks-{}", std::process::id()));
    // stale socket files must be unlinked by the caller before binding
    let _ = std::fs::remove_file(&path);

    let server = Server::builder()
        .address(Endpoint::unix(&path))
        .handler(status_handler(StatusCode::ACCEPTED))
        .build();
    let (_, task) = spawn(&server).await;

    let mut stream = tokio::net::UnixStream::connect(&path).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let res = read_response(&mut stream).await;
    assert!(res.starts_with("HTTP/1.1 202 Accepted\r\n"), "{:?}", res);

    server.stop();
    task.await.unwrap().unwrap();
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn keep_alive_round_trip() {
    let server = Server::bind(Endpoint::ip4([127, 0, 0, 1], 0));
    server.append_route("/again", status_handler(StatusCode::OK));
    let (addr, task) = spawn(&server).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();

    // HTTP/1.0 stays open only with an explicit keep-alive, and the
    // response must carry the request's Connection header back
    stream
        .write_all(b"GET /again HTTP/1.0\r\nConnection: keep-alive\r\n\r\n")
        .await
        .unwrap();
    let res = read_response(&mut stream).await;
    assert!(res.starts_with("HTTP/1.0 200 OK\r\n") || res.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(
        res.to_ascii_lowercase().contains("connection: keep-alive\r\n"),
        "{:?}",
        res
    );

    // second request on the same socket
    stream
        .write_all(b"GET /again HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let res = read_response(&mut stream).await;
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"), "{:?}", res);

    server.stop();
    drop(stream);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn not_handled_sentinel_answers_404() {
    let server = Server::bind(Endpoint::ip4([127, 0, 0, 1], 0));
    server.append_route(
        "/declined",
        handler_fn(|_req| async { Err::<Response<Bytes>, _>(NotHandled) }),
    );
    let (addr, task) = spawn(&server).await;

    let res = get(addr, "/declined").await;
    assert!(res.starts_with("HTTP/1.1 404 Not Found\r\n"), "{:?}", res);

    server.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn websocket_upgrade_and_masked_echo() {
    let server = Server::bind(Endpoint::ip4([127, 0, 0, 1], 0));
    server.append_route("GET /ws", foxhole::ws::websocket_echo());
    let (addr, task) = spawn(&server).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /ws HTTP/1.1\r\n\
              Host: localhost\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Version: 13\r\n\
              Sec-WebSocket-Key: QUJDREVGR0hJSktMTU5PUA==\r\n\
              \r\n",
        )
        .await
        .unwrap();

    let head = read_head(&mut stream).await;
    assert!(
        head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"),
        "{:?}",
        head
    );
    assert!(
        head.to_ascii_lowercase()
            .contains("sec-websocket-accept: 9twncz4oi2q3eudqlaetcuip07c=\r\n"),
        "{:?}",
        head
    );

    // masked text frame carrying "FlyingFox"
    let mask = [0x0Du8, 0x25, 0x3A, 0x90];
    let mut frame = vec![0x81u8, 0x80 | 9];
    frame.extend_from_slice(&mask);
    frame.extend(
        b"FlyingFox"
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ mask[i % 4]),
    );
    stream.write_all(&frame).await.unwrap();

    let mut echoed = [0u8; 11];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed[0], 0x81);
    assert_eq!(echoed[1], 9, "echoed frame must be unmasked");
    assert_eq!(&echoed[2..], b"FlyingFox");

    server.stop();
    drop(stream);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn wait_until_listening_gates_on_start() {
    let server = Server::bind(Endpoint::ip4([127, 0, 0, 1], 0));

    // before start: a waiter suspends, and a deadline fails it
    let err = server
        .wait_until_listening_timeout(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // a cancelled waiter goes away promptly
    let pending = {
        let server = server.clone();
        tokio::spawn(async move { server.wait_until_listening().await })
    };
    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    // started: waiters registered before the bind resolve true
    let waiter = {
        let server = server.clone();
        tokio::spawn(async move { server.wait_until_listening().await })
    };
    let (_, task) = spawn(&server).await;
    waiter.await.unwrap().unwrap();
    assert!(server.is_listening());

    server.stop();
    task.await.unwrap().unwrap();
    assert!(!server.is_listening());
}

#[tokio::test]
async fn start_twice_fails() {
    let server = Server::bind(Endpoint::ip4([127, 0, 0, 1], 0));
    let (_, task) = spawn(&server).await;

    let err = server.start().await.unwrap_err();
    assert!(err.is_user());

    server.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn logs_startup_and_connection_pairs() {
    let logger = CaptureLogger::default();
    let server = Server::builder()
        .address(Endpoint::ip4([127, 0, 0, 1], 0))
        .logger(logger.clone())
        .build();
    server.append_route("GET /hello", status_handler(StatusCode::OK));
    let (addr, task) = spawn(&server).await;

    let res = get(addr, "/hello").await;
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));

    server.stop();
    task.await.unwrap().unwrap();

    let lines = logger.lines();
    assert!(
        lines[0].starts_with("starting server 127.0.0.1:"),
        "{:?}",
        lines
    );
    let opens: Vec<_> = lines
        .iter()
        .filter(|l| l.ends_with("> open connection"))
        .collect();
    let closes: Vec<_> = lines
        .iter()
        .filter(|l| l.ends_with("> close connection"))
        .collect();
    assert_eq!(opens.len(), 1, "{:?}", lines);
    assert_eq!(closes.len(), 1, "{:?}", lines);
    assert!(
        lines.iter().any(|l| l.contains("> request: GET /hello")),
        "{:?}",
        lines
    );
}

#[tokio::test]
async fn stop_from_handler_still_delivers_response() {
    let server = Server::bind(Endpoint::ip4([127, 0, 0, 1], 0));
    {
        let stopper = server.clone();
        server.append_route(
            "GET /shutdown",
            handler_fn(move |_req| {
                let stopper = stopper.clone();
                async move {
                    stopper.stop();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, foxhole::Error>(Response::new(Bytes::from_static(b"bye")))
                }
            }),
        );
    }
    let (addr, task) = spawn(&server).await;

    // the in-flight response is drained before start() returns
    let res = get(addr, "/shutdown").await;
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"), "{:?}", res);
    assert!(res.ends_with("bye"), "{:?}", res);

    task.await.unwrap().unwrap();
    assert!(!server.is_listening());
}

// ===== helpers =====

fn status_handler(status: StatusCode) -> impl Handler + 'static {
    handler_fn(move |_req| async move {
        let mut res = Response::new(Bytes::new());
        *res.status_mut() = status;
        Ok::<_, foxhole::Error>(res)
    })
}

async fn spawn(server: &Server) -> (std::net::SocketAddr, tokio::task::JoinHandle<foxhole::Result<()>>) {
    let task = {
        let server = server.clone();
        tokio::spawn(async move { server.start().await })
    };
    server
        .wait_until_listening_timeout(Duration::from_secs(5))
        .await
        .expect("server did not come up");
    let addr = match server.local_endpoint() {
        Some(Endpoint::Ip(addr)) => addr,
        other => {
            // unix-socket servers don't produce a TCP address
            assert!(other.is_some());
            "127.0.0.1:0".parse().unwrap()
        }
    };
    (addr, task)
}

async fn get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            format!(
                "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
                path
            )
            .as_bytes(),
        )
        .await
        .unwrap();
    read_response(&mut stream).await
}

/// Reads one whole response: head, then `Content-Length` body bytes.
async fn read_response<T>(stream: &mut T) -> String
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let head = read_head_bytes(stream).await;
    let text = String::from_utf8(head.clone()).unwrap();

    let content_length = text
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    let mut body = vec![0u8; content_length];
    stream.read_exact(&mut body).await.unwrap();

    format!("{}{}", text, String::from_utf8_lossy(&body))
}

async fn read_head<T>(stream: &mut T) -> String
where
    T: AsyncRead + Unpin,
{
    String::from_utf8(read_head_bytes(stream).await).unwrap()
}

/// Reads byte-by-byte up to and including the blank line ending the head.
async fn read_head_bytes<T>(stream: &mut T) -> Vec<u8>
where
    T: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.expect("response head");
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") {
            return head;
        }
    }
}

#[derive(Clone, Default)]
struct CaptureLogger {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CaptureLogger {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Logger for CaptureLogger {
    fn log_info(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_owned());
    }

    fn log_error(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_owned());
    }

    fn log_critical(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_owned());
    }
}
