//! Accept loop shared by the HTTP router and the upgrade bridge.
//!
//! Each accepted socket has its request head sniffed. Foreign upgrades go to
//! the bridge; everything else is served by hyper with the sniffed bytes
//! replayed in front of the socket. While bridging is on, HTTP responses
//! other than `101` carry `connection: close`, so every request on the
//! listener arrives on a fresh socket and is sniffed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware;
use axum::response::Response;
use bytes::BytesMut;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::bridge::UpgradeBridge;
use crate::bridge::head::{HeadRead, RequestHead, read_head};
use crate::bridge::prefixed::PrefixedIo;

/// Deadline for a client to finish sending its request head.
const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Where an accepted connection is sent.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// Splice to the gateway.
    Bridge,
    /// Serve with the HTTP router.
    Http,
}

/// Per-connection routing decision.
#[derive(Clone)]
pub struct Dispatcher {
    router: Router,
    bridge: Option<Arc<UpgradeBridge>>,
    ws_path: Arc<str>,
    max_head_bytes: usize,
}

impl Dispatcher {
    /// Build a dispatcher. `bridge` is `None` when bridging is disabled.
    pub fn new(
        router: Router,
        bridge: Option<Arc<UpgradeBridge>>,
        ws_path: &str,
        max_head_bytes: usize,
    ) -> Self {
        let router = if bridge.is_some() {
            router.layer(middleware::map_response(close_after_response))
        } else {
            router
        };
        Self {
            router,
            bridge,
            ws_path: Arc::from(ws_path),
            max_head_bytes,
        }
    }

    /// Decide the route for a parsed head.
    pub fn route(&self, head: &RequestHead) -> Route {
        if self.bridge.is_some() && head.is_upgrade() && head.path != *self.ws_path {
            Route::Bridge
        } else {
            Route::Http
        }
    }

    /// Sniff, route and serve one accepted connection to completion.
    pub async fn handle(&self, mut stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
        let mut buf = BytesMut::new();
        let sniffed =
            tokio::time::timeout(HEAD_READ_TIMEOUT, read_head(&mut stream, &mut buf, self.max_head_bytes))
                .await;
        let head = match sniffed {
            Ok(Ok(HeadRead::Complete(head))) => Some(head),
            Ok(Ok(HeadRead::Unparsed)) => None,
            Ok(Ok(HeadRead::Closed)) => return,
            Ok(Err(error)) => {
                debug!(%peer, %error, "read failed before request head");
                return;
            }
            Err(_) => {
                debug!(%peer, "request head timed out");
                return;
            }
        };

        let bridge = self
            .bridge
            .as_ref()
            .filter(|_| head.as_ref().is_some_and(|h| self.route(h) == Route::Bridge));
        match bridge {
            Some(bridge) => {
                debug!(%peer, "bridging upgrade");
                let _ = bridge.forward(stream, &buf, &cancel).await;
            }
            None => {
                self.serve_http(PrefixedIo::new(buf.freeze(), stream), peer, cancel)
                    .await;
            }
        }
    }

    async fn serve_http(
        &self,
        io: PrefixedIo<TcpStream>,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) {
        let service = TowerToHyperService::new(self.router.clone());
        let conn = hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(io), service)
            .with_upgrades();
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            () = cancel.cancelled() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };
        if let Err(error) = result {
            debug!(%peer, %error, "http connection ended with error");
        }
    }
}

/// End the HTTP connection after this response unless it switches protocols.
async fn close_after_response(mut response: Response) -> Response {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        let _ = response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
    }
    response
}

/// Accept connections until `cancel` fires. Each connection task is spawned
/// on `tracker`.
pub async fn accept_loop(
    listener: TcpListener,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = cancel.cancelled() => break,
        };
        match accepted {
            Ok((stream, peer)) => {
                let _ = stream.set_nodelay(true);
                let dispatcher = dispatcher.clone();
                let cancel = cancel.clone();
                let _ = tracker.spawn(async move {
                    dispatcher.handle(stream, peer, cancel).await;
                });
            }
            Err(error) => {
                warn!(%error, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    info!("accept loop stopped");
}
