use std::{convert::Infallible, future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use http_body_util::BodyExt;
use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request};
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::{oneshot, watch},
    task::{JoinHandle, JoinSet},
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use super::ServerError;
use crate::handler::{ClientInfo, SharedHandler};

/// How long in-flight connections may drain after a listener stops.
pub(crate) const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pause after a failed accept, so errors like EMFILE do not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A running accept loop.
pub(crate) struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    released: oneshot::Receiver<()>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and returns once the listening socket is closed. Open connections
    /// keep draining in the background until the grace period runs out.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.released.await;
    }

    /// Stops accepting and waits for open connections to drain or be aborted.
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(%err, "Listener task failed");
        }
    }
}

/// Binds `addr` and serves `handler` on it, over TLS when `tls` is given.
pub(crate) async fn spawn(
    addr: SocketAddr,
    handler: SharedHandler,
    tls: Option<Arc<ServerConfig>>,
) -> Result<ListenerHandle, ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local_addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (released_tx, released_rx) = oneshot::channel();
    let acceptor = tls.map(TlsAcceptor::from);

    info!(addr = %local_addr, tls = acceptor.is_some(), "Listening");

    let task = tokio::spawn(accept_loop(
        listener,
        handler,
        acceptor,
        shutdown_rx,
        released_tx,
    ));

    Ok(ListenerHandle {
        local_addr,
        shutdown: shutdown_tx,
        released: released_rx,
        task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    handler: SharedHandler,
    acceptor: Option<TlsAcceptor>,
    mut shutdown: watch::Receiver<bool>,
    released: oneshot::Sender<()>,
) {
    let local_addr = listener.local_addr().ok();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            (stream, peer) = accept_retrying(|| listener.accept()) => {
                connections.spawn(serve_connection(
                    stream,
                    peer,
                    handler.clone(),
                    acceptor.clone(),
                    shutdown.clone(),
                ));
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    let _ = released.send(());
    debug!(addr = ?local_addr, open = connections.len(), "Listener closed, draining connections");

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(addr = ?local_addr, open = connections.len(), "Grace period elapsed, aborting connections");
        connections.abort_all();
    }
}

async fn accept_retrying<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(err) => {
                warn!(%err, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: SharedHandler,
    acceptor: Option<TlsAcceptor>,
    shutdown: watch::Receiver<bool>,
) {
    let client = ClientInfo {
        addr: peer,
        tls: acceptor.is_some(),
    };

    match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => serve_http(stream, client, handler, shutdown).await,
            Err(err) => debug!(%peer, %err, "TLS handshake failed"),
        },
        None => serve_http(stream, client, handler, shutdown).await,
    }
}

async fn serve_http<S>(
    stream: S,
    client: ClientInfo,
    handler: SharedHandler,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let handler = handler.clone();

        async move {
            let mut req = req.map(|body| body.boxed());
            req.extensions_mut().insert(client);
            Ok::<_, Infallible>(handler.handle(req).await)
        }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(err) = result {
                debug!(peer = %client.addr, %err, "Connection error");
            }
        }
        _ = shutdown.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(err) = conn.await {
                debug!(peer = %client.addr, %err, "Connection error during shutdown");
            }
        }
    }
}
