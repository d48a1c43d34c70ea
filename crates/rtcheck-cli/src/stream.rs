//! Socket-backed console streams.
//!
//! Selects the socket type from the address scheme:
//! - `tcp://host:port` → TCP
//! - `unix:///path` → Unix domain socket

use std::time::Duration;

use futures_util::future::BoxFuture;
use tracing::debug;

use rtcheck_core::error::{CheckupError, CheckupResult};
use rtcheck_core::transport::{ConsoleStream, IoConsoleStream, StreamFactory, TargetId};

/// Socket kind, inferred from the console address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Tcp,
    Unix,
}

/// Determine the socket kind from an address, returning it with the scheme stripped.
pub fn detect_socket(address: &str) -> CheckupResult<(SocketKind, &str)> {
    if let Some(rest) = address.strip_prefix("tcp://") {
        Ok((SocketKind::Tcp, rest))
    } else if let Some(rest) = address.strip_prefix("unix://") {
        Ok((SocketKind::Unix, rest))
    } else {
        Err(CheckupError::Connection(format!(
            "unsupported console address: {address} (expected tcp:// or unix://)"
        )))
    }
}

/// Fill the `{namespace}` and `{name}` placeholders of an address template.
pub fn render_address(template: &str, target: &TargetId) -> String {
    template
        .replace("{namespace}", &target.namespace)
        .replace("{name}", &target.name)
}

/// Opens console streams by connecting to a per-target socket.
pub struct SocketStreamFactory {
    template: String,
}

impl SocketStreamFactory {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    async fn connect(&self, target: &TargetId) -> CheckupResult<Box<dyn ConsoleStream>> {
        let address = render_address(&self.template, target);
        let (kind, rest) = detect_socket(&address)?;
        debug!(target = %target, address = %address, ?kind, "connecting to console");

        let refused = |e: std::io::Error| {
            CheckupError::Connection(format!("failed to connect to console of {target} at {address}: {e}"))
        };
        match kind {
            SocketKind::Tcp => {
                let stream = tokio::net::TcpStream::connect(rest).await.map_err(refused)?;
                stream.set_nodelay(true).map_err(refused)?;
                Ok(Box::new(IoConsoleStream::new(stream)))
            }
            #[cfg(unix)]
            SocketKind::Unix => {
                let stream = tokio::net::UnixStream::connect(rest).await.map_err(refused)?;
                Ok(Box::new(IoConsoleStream::new(stream)))
            }
            #[cfg(not(unix))]
            SocketKind::Unix => Err(CheckupError::Connection(
                "unix console sockets are not supported on this platform".into(),
            )),
        }
    }
}

impl StreamFactory for SocketStreamFactory {
    fn open<'a>(
        &'a self,
        target: &'a TargetId,
        timeout: Duration,
    ) -> BoxFuture<'a, CheckupResult<Box<dyn ConsoleStream>>> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.connect(target)).await {
                Ok(res) => res,
                Err(_) => Err(CheckupError::Connection(format!(
                    "timed out after {} connecting to console of {target}",
                    humantime::format_duration(timeout)
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn detect_socket_kinds() {
        assert_eq!(
            detect_socket("tcp://127.0.0.1:7000").unwrap(),
            (SocketKind::Tcp, "127.0.0.1:7000")
        );
        assert_eq!(
            detect_socket("unix:///run/console.sock").unwrap(),
            (SocketKind::Unix, "/run/console.sock")
        );
        assert!(detect_socket("ws://host").is_err());
    }

    #[test]
    fn renders_placeholders() {
        let target = TargetId::new("rt", "realtime-vmi-under-test-ab12c");
        assert_eq!(
            render_address("unix:///run/{namespace}/{name}.sock", &target),
            "unix:///run/rt/realtime-vmi-under-test-ab12c.sock"
        );
    }

    #[tokio::test]
    async fn connects_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"vm login: ").await.unwrap();
            let mut buf = [0u8; 8];
            let _ = socket.read(&mut buf).await;
        });

        let factory = SocketStreamFactory::new(format!("tcp://127.0.0.1:{port}"));
        let stream = factory
            .open(&TargetId::new("ns", "vm"), Duration::from_secs(5))
            .await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn connection_failures_are_connection_errors() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SocketStreamFactory::new(format!("unix://{}/{{name}}.sock", dir.path().display()));
        let err = factory
            .open(&TargetId::new("ns", "vm"), Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CheckupError::Connection(_)));
    }
}
