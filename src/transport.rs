//! HTTP transport for the HKP server.
//!
//! One request per connection: responses carry `Connection: close` and
//! keep-alive is disabled. Connections are served on the caller's task.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::hkp::{parse_query, HkpDispatcher, HkpResponse};
use crate::keystore::KeyStore;

/// Time allowed for a client to send its request head.
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for a whole connection.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// A TCP listener for the HKP server.
#[derive(Debug, Default)]
pub struct HttpTransport {
    listener: Option<TcpListener>,
}

impl HttpTransport {
    /// Create a transport that is not listening.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `addr` and start listening. Port 0 picks any free port. Returns
    /// the bound port.
    pub async fn listen(&mut self, addr: SocketAddr) -> Result<u16> {
        if self.listener.is_some() {
            return Err(Error::state("HTTP transport already listening"));
        }
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        info!(%addr, port, "HKP server listening");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Whether the transport is bound.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// The bound port, if listening.
    pub fn port(&self) -> Option<u16> {
        self.listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|a| a.port())
    }

    /// Close the listener. Does nothing when not listening.
    pub fn stop(&mut self) {
        if self.listener.take().is_some() {
            debug!("HKP server stopped");
        }
    }

    /// Accept the next connection. Pending forever when not listening.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        match &self.listener {
            Some(listener) => Ok(listener.accept().await?),
            None => std::future::pending().await,
        }
    }
}

/// Serve one HTTP connection with `dispatcher`.
pub async fn serve_connection<K: KeyStore>(
    stream: TcpStream,
    dispatcher: &HkpDispatcher<K>,
) -> Result<()> {
    let io = TokioIo::new(stream);
    let service = service_fn(|req: Request<Incoming>| {
        let query = parse_query(req.uri().query());
        let response = dispatcher.handle(req.method(), req.uri().path(), &query);
        async move { Ok::<_, Infallible>(into_http(response)) }
    });

    let conn = http1::Builder::new()
        .keep_alive(false)
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT)
        .serve_connection(io, service);

    match tokio::time::timeout(CONNECTION_TIMEOUT, conn).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!("HTTP connection timed out");
            Ok(())
        }
    }
}

fn into_http(response: HkpResponse) -> Response<Full<Bytes>> {
    let mut http = Response::new(Full::new(Bytes::from(response.body)));
    *http.status_mut() = response.status;
    *http.headers_mut() = response.headers;
    http
}
