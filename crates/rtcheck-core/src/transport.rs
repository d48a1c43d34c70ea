//! Abstract console transport for rtcheck.
//!
//! A [`StreamFactory`] opens a [`ConsoleStream`] to one remote target. The
//! stream is then pumped against a pair of in-memory pipes owned by the
//! console session, so the expect engine never touches the network directly.

use std::fmt;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, SimplexStream, WriteHalf};

use crate::error::CheckupResult;

/// Opaque `namespace/name` identity of a remote target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId {
    pub namespace: String,
    pub name: String,
}

impl TargetId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Pipe halves handed to a [`ConsoleStream`].
pub struct StreamOptions {
    /// Bytes written by the engine, to be forwarded to the remote console.
    pub input: ReadHalf<SimplexStream>,
    /// Destination for bytes received from the remote console.
    pub output: WriteHalf<SimplexStream>,
}

/// A connected console stream that can be pumped against a pipe pair.
pub trait ConsoleStream: Send {
    /// Forward bytes in both directions until either side closes.
    fn stream(self: Box<Self>, opts: StreamOptions) -> BoxFuture<'static, CheckupResult<()>>;
}

/// Opens console streams to remote targets.
pub trait StreamFactory: Send + Sync {
    /// Connect to the console of `target`, giving up after `timeout`.
    fn open<'a>(
        &'a self,
        target: &'a TargetId,
        timeout: Duration,
    ) -> BoxFuture<'a, CheckupResult<Box<dyn ConsoleStream>>>;
}

/// [`ConsoleStream`] over any async byte stream (TCP, Unix socket, in-memory duplex).
pub struct IoConsoleStream<S> {
    inner: S,
}

impl<S> IoConsoleStream<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> ConsoleStream for IoConsoleStream<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn stream(self: Box<Self>, opts: StreamOptions) -> BoxFuture<'static, CheckupResult<()>> {
        Box::pin(async move {
            let (mut remote_rx, mut remote_tx) = tokio::io::split(self.inner);
            let StreamOptions {
                mut input,
                mut output,
            } = opts;

            let upstream = async {
                tokio::io::copy(&mut input, &mut remote_tx).await?;
                remote_tx.shutdown().await
            };
            // Shut the pipe down on remote EOF so the engine observes it.
            let downstream = async {
                let copied = tokio::io::copy(&mut remote_rx, &mut output).await;
                let _ = output.shutdown().await;
                copied.map(|_| ())
            };

            tokio::select! {
                res = upstream => res?,
                res = downstream => res?,
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn target_display() {
        assert_eq!(TargetId::new("ns", "vm").to_string(), "ns/vm");
    }

    #[tokio::test]
    async fn pumps_both_directions() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let (input, mut engine_tx) = tokio::io::simplex(1024);
        let (mut engine_rx, output) = tokio::io::simplex(1024);

        let pump = tokio::spawn(Box::new(IoConsoleStream::new(local)).stream(StreamOptions { input, output }));

        engine_tx.write_all(b"ls\n").await.unwrap();
        let mut buf = [0u8; 3];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ls\n");

        remote.write_all(b"ok\r\n").await.unwrap();
        let mut buf = [0u8; 4];
        engine_rx.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok\r\n");

        // Remote hangup ends the pump and surfaces EOF to the engine.
        drop(remote);
        pump.await.unwrap().unwrap();
        let mut rest = Vec::new();
        assert_eq!(engine_rx.read_to_end(&mut rest).await.unwrap(), 0);
    }
}
