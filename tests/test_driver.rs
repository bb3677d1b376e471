use std::cell::RefCell;
use std::io;
use std::net::TcpListener;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::LocalSet;

use courier::poll::driver::Driver;
use courier::poll::{EventHandler, Poller, TimerId};
use courier::server::Context;

#[tokio::test]
async fn test_serves_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let driver = Driver::new();
    let mut context = Context::new(Box::new(driver.poller()), Duration::from_secs(10));
    context.serve(listener).unwrap();
    context.listen(None, "/hello", |req, resp| {
        resp.set_body(format!("hello from {}", req.path().unwrap_or("?")));
        Ok(())
    });
    let context = Rc::new(RefCell::new(context));

    let local = LocalSet::new();
    local
        .run_until(async {
            let running = tokio::task::spawn_local(driver.run(Rc::clone(&context)));

            let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
            client
                .write_all(b"GET /hello/there HTTP/1.1\r\nHost: test\r\n\r\n")
                .await
                .unwrap();

            let expected = "hello from /hello/there";
            let mut wire = Vec::new();
            let mut buf = [0u8; 1024];
            tokio::time::timeout(Duration::from_secs(5), async {
                while !wire.ends_with(expected.as_bytes()) {
                    let n = client.read(&mut buf).await.unwrap();
                    assert!(n > 0, "server hung up");
                    wire.extend_from_slice(&buf[..n]);
                }
            })
            .await
            .unwrap();

            let wire = String::from_utf8(wire).unwrap();
            assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"), "{wire}");
            assert!(wire.contains("Content-Length: 23\r\n"), "{wire}");

            drop(client);
            tokio::time::timeout(Duration::from_secs(5), async {
                while context.borrow().connection_count() > 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();
            running.abort();
        })
        .await;
}

async fn exchange(client: &mut tokio::net::TcpStream, path: &str) -> String {
    let request = format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();

    let expected = format!("hello from {path}");
    let mut wire = Vec::new();
    let mut buf = [0u8; 1024];
    tokio::time::timeout(Duration::from_secs(5), async {
        while !wire.ends_with(expected.as_bytes()) {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "server hung up");
            wire.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .unwrap();
    String::from_utf8(wire).unwrap()
}

#[tokio::test]
async fn test_serves_requests_back_to_back() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let driver = Driver::new();
    let mut context = Context::new(Box::new(driver.poller()), Duration::from_secs(10));
    context.serve(listener).unwrap();
    context.listen(None, "/hello", |req, resp| {
        resp.set_body(format!("hello from {}", req.path().unwrap_or("?")));
        Ok(())
    });
    let context = Rc::new(RefCell::new(context));

    let local = LocalSet::new();
    local
        .run_until(async {
            let running = tokio::task::spawn_local(driver.run(Rc::clone(&context)));

            let mut first = tokio::net::TcpStream::connect(addr).await.unwrap();
            let wire = exchange(&mut first, "/hello/one").await;
            assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"), "{wire}");
            let wire = exchange(&mut first, "/hello/two").await;
            assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"), "{wire}");

            let mut second = tokio::net::TcpStream::connect(addr).await.unwrap();
            let wire = exchange(&mut second, "/hello/three").await;
            assert!(wire.ends_with("hello from /hello/three"), "{wire}");
            assert_eq!(context.borrow().connection_count(), 2);

            running.abort();
        })
        .await;
}

#[derive(Default)]
struct Timers {
    fired: Vec<TimerId>,
}

impl EventHandler for Timers {
    fn readable(&mut self, _fd: RawFd) -> io::Result<()> {
        Err(io::ErrorKind::WouldBlock.into())
    }

    fn writable(&mut self, _fd: RawFd) -> io::Result<()> {
        Err(io::ErrorKind::WouldBlock.into())
    }

    fn error(&mut self, _fd: RawFd) {}

    fn timeout(&mut self, id: TimerId) {
        self.fired.push(id);
    }
}

#[tokio::test]
async fn test_timers_fire_unless_cancelled() {
    let driver = Driver::new();
    let mut poller = driver.poller();
    let handler = Rc::new(RefCell::new(Timers::default()));

    let kept = poller.set_timeout(Duration::from_millis(10));
    let cancelled = poller.set_timeout(Duration::from_millis(20));
    poller.cancel_timeout(cancelled);
    assert_ne!(kept, cancelled);

    let local = LocalSet::new();
    local
        .run_until(async {
            let running = tokio::task::spawn_local(driver.run(Rc::clone(&handler)));
            tokio::time::sleep(Duration::from_millis(100)).await;
            running.abort();
        })
        .await;

    assert_eq!(handler.borrow().fired, vec![kept]);
}
