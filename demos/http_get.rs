//! Worked example: an HTTP GET driven through the reactor, adapted from
//! the teacher's own `archived/reactor-executor/src/http.rs` worked
//! example onto the `taskloop` `Runtime`/reactor API. Demos are out of
//! scope for the core itself but the teacher keeps one as the worked
//! example for its reactor, so this one is kept and adapted rather than
//! dropped (see DESIGN.md).

use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::pin::Pin;
use std::task::{Context, Poll};

use mio::Interest;
use taskloop::{Builder, Runtime, Token};

struct HttpGet<'a> {
    runtime: &'a Runtime,
    path: String,
    stream: Option<mio::net::TcpStream>,
    token: Option<Token>,
    buffer: Vec<u8>,
}

impl<'a> HttpGet<'a> {
    fn new(runtime: &'a Runtime, path: &str) -> Self {
        Self {
            runtime,
            path: path.to_string(),
            stream: None,
            token: None,
            buffer: Vec::new(),
        }
    }

    fn write_request(&mut self) -> std::io::Result<()> {
        let std_stream = std::net::TcpStream::connect("127.0.0.1:8080")?;
        std_stream.set_nonblocking(true)?;
        let mut stream = mio::net::TcpStream::from_std(std_stream);
        stream.write_all(&get_request(&self.path))?;
        self.stream = Some(stream);
        Ok(())
    }
}

impl<'a> std::future::Future for HttpGet<'a> {
    type Output = std::io::Result<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.stream.is_none() {
            if let Err(e) = self.write_request() {
                return Poll::Ready(Err(e));
            }
            let fd = self.stream.as_ref().unwrap().as_raw_fd();
            let token = match self.runtime.register(fd, Interest::READABLE) {
                Some(Ok(token)) => token,
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => {
                    return Poll::Ready(Err(std::io::Error::new(
                        ErrorKind::Other,
                        "runtime has no reactor (built with enable_io(false))",
                    )))
                }
            };
            self.token = Some(token);
            self.runtime.want(token, Interest::READABLE, cx.waker());
        }

        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.as_mut().unwrap().read(&mut chunk) {
                Ok(0) => {
                    let fd = self.stream.as_ref().unwrap().as_raw_fd();
                    if let Some(token) = self.token.take() {
                        let _ = self.runtime.deregister(fd, token);
                    }
                    let body = String::from_utf8_lossy(&self.buffer).into_owned();
                    return Poll::Ready(Ok(body));
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    continue;
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    self.runtime
                        .want(self.token.unwrap(), Interest::READABLE, cx.waker());
                    return Poll::Pending;
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }
}

fn get_request(path: &str) -> Vec<u8> {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").into_bytes()
}

fn main() {
    let runtime = Builder::new().worker_count(2).build().expect("failed to build runtime");

    let result = runtime.block_on(async {
        let first = HttpGet::new(&runtime, "/600/HelloAsyncAwait").await;
        println!("{:?}", first);
        HttpGet::new(&runtime, "/400/HelloAsyncAwait").await
    });

    match result {
        Ok(body) => println!("{body}"),
        Err(e) => eprintln!("request failed: {e}"),
    }

    runtime.stop();
}
