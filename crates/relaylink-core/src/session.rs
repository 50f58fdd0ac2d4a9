//! Negotiated bytestream session

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use crate::candidate::CandidateHost;

/// Open byte stream between the two peers, piped through the selected relay
///
/// Dropping the session closes the relay connection.
#[derive(Debug)]
pub struct BytestreamSession {
    stream: TcpStream,
    session_id: String,
    selected: CandidateHost,
    direct: bool,
}

impl BytestreamSession {
    pub(crate) fn new(
        stream: TcpStream,
        session_id: impl Into<String>,
        selected: CandidateHost,
        initiator: &str,
    ) -> Self {
        let direct = selected.is_owned_by(initiator);
        Self {
            stream,
            session_id: session_id.into(),
            selected,
            direct,
        }
    }

    /// Session identifier
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Relay the stream runs through
    #[must_use]
    pub fn selected_host(&self) -> &CandidateHost {
        &self.selected
    }

    /// True when the relay is the initiator's own, false for a third-party relay
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    /// Borrow the underlying connection
    #[must_use]
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    /// Unwrap the underlying connection
    #[must_use]
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }

    /// Flush and shut down the write half, then drop the connection
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    pub async fn close(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

impl AsyncRead for BytestreamSession {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for BytestreamSession {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
