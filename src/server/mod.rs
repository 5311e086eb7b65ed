//! The proxy's HTTP and HTTPS listeners.

pub(crate) mod listener;

use std::{io, net::SocketAddr, sync::Arc};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    handler::SharedHandler,
    tls::{self, CertError, CertificateStore},
};

use listener::ListenerHandle;

#[derive(Debug, Error)]
pub(crate) enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Tls(#[from] CertError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HttpsState {
    Running { addr: SocketAddr, certificates: usize },
    /// No certificate is available to serve.
    Stopped,
}

/// Owns the HTTP listener and the certificate-dependent HTTPS listener.
pub(crate) struct Server {
    http_addr: SocketAddr,
    https_addr: SocketAddr,
    handler: SharedHandler,
    certificates: Arc<CertificateStore>,
    http: Mutex<Option<ListenerHandle>>,
    https: Mutex<Option<ListenerHandle>>,
}

impl Server {
    pub(crate) fn new(
        http_addr: SocketAddr,
        https_addr: SocketAddr,
        handler: SharedHandler,
        certificates: Arc<CertificateStore>,
    ) -> Self {
        Self {
            http_addr,
            https_addr,
            handler,
            certificates,
            http: Mutex::default(),
            https: Mutex::default(),
        }
    }

    /// Starts the HTTP listener, replacing a running one.
    pub(crate) async fn listen_and_serve_http(&self) -> Result<SocketAddr, ServerError> {
        let mut slot = self.http.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }

        let handle = listener::spawn(self.http_addr, self.handler.clone(), None).await?;
        let addr = handle.local_addr();
        *slot = Some(handle);

        Ok(addr)
    }

    /// Re-creates the HTTPS listener from the current certificate snapshot.
    ///
    /// The previous listener's socket is released before the new one binds. With no
    /// certificates the listener stays down.
    pub(crate) async fn restart_https(&self) -> Result<HttpsState, ServerError> {
        let mut slot = self.https.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }

        let snapshot = self.certificates.active_certificates();
        if snapshot.is_empty() {
            info!("No certificate available, HTTPS stays down");
            return Ok(HttpsState::Stopped);
        }

        let config = tls::server_config(&snapshot)?;
        let handle = listener::spawn(self.https_addr, self.handler.clone(), Some(config)).await?;
        let addr = handle.local_addr();
        *slot = Some(handle);

        Ok(HttpsState::Running {
            addr,
            certificates: snapshot.len(),
        })
    }

    #[cfg(test)]
    pub(crate) async fn https_addr(&self) -> Option<SocketAddr> {
        self.https.lock().await.as_ref().map(ListenerHandle::local_addr)
    }

    /// Stops both listeners and waits for their connections to finish.
    pub(crate) async fn shutdown(&self) {
        let http = self.http.lock().await.take();
        let https = self.https.lock().await.take();

        for handle in [http, https].into_iter().flatten() {
            handle.shutdown().await;
        }

        info!("Server stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;

    use http::StatusCode;
    use rustls::{pki_types::ServerName, ClientConfig, RootCertStore};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };
    use tokio_rustls::TlsConnector;

    use super::*;
    use crate::{
        config::CertConfig,
        handler::{handler_fn, text_response},
        tls::store::tests::generate,
    };

    fn server(certificates: Arc<CertificateStore>) -> Server {
        let any = "127.0.0.1:0".parse().unwrap();
        let handler = handler_fn(|_req| async { text_response(StatusCode::OK, "hello") });
        Server::new(any, any, handler, certificates)
    }

    async fn tls_get(addr: SocketAddr, cert: &CertConfig, server_name: &str) -> String {
        let mut roots = RootCertStore::empty();
        for der in rustls_pemfile::certs(&mut BufReader::new(cert.cert_pem.as_bytes())) {
            roots.add(der.unwrap()).unwrap();
        }
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();

        let tcp = TcpStream::connect(addr).await.unwrap();
        let name = ServerName::try_from(server_name.to_string()).unwrap();
        let mut stream = TlsConnector::from(Arc::new(config))
            .connect(name, tcp)
            .await
            .unwrap();

        let request = format!("GET / HTTP/1.1\r\nHost: {server_name}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        let _ = stream.read_to_end(&mut response).await;
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn https_stays_down_without_certificates() {
        let server = server(Arc::default());

        assert_eq!(server.restart_https().await.unwrap(), HttpsState::Stopped);
    }

    #[tokio::test]
    async fn https_serves_stored_certificate() {
        let certificates = Arc::new(CertificateStore::default());
        let cert = generate("c1", &["a.test"]);
        certificates.put(&cert).await.unwrap();
        let server = server(certificates.clone());

        let HttpsState::Running { addr, certificates: count } =
            server.restart_https().await.unwrap()
        else {
            panic!("https should be running");
        };
        assert_eq!(count, 1);

        let response = tls_get(addr, &cert, "a.test").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("hello"));

        certificates.delete("c1").await.unwrap();
        assert_eq!(server.restart_https().await.unwrap(), HttpsState::Stopped);
        assert!(TcpStream::connect(addr).await.is_err());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn http_restart_rebinds() {
        let server = server(Arc::default());

        let first = server.listen_and_serve_http().await.unwrap();
        let second = server.listen_and_serve_http().await.unwrap();

        assert!(TcpStream::connect(second).await.is_ok());
        if first != second {
            assert!(TcpStream::connect(first).await.is_err());
        }
        server.shutdown().await;
    }
}
