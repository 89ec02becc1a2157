//! Byte stream under a client link, plain TCP or TLS.

use pin_project_lite::pin_project;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pin_project! {
    /// What a [`Dialer`](crate::Dialer) hands to the connection manager.
    #[project = ClientStreamProj]
    pub enum ClientStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: TlsStream<TcpStream> },
    }
}

impl ClientStream {
    pub fn plain(stream: TcpStream) -> Self {
        ClientStream::Plain { stream }
    }

    pub fn tls(stream: TlsStream<TcpStream>) -> Self {
        ClientStream::Tls { stream }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, ClientStream::Tls { .. })
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            ClientStream::Plain { stream } => stream,
            ClientStream::Tls { stream } => stream.get_ref().0,
        }
    }

    /// Remote address of the underlying socket.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            ClientStreamProj::Tls { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            ClientStreamProj::Tls { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_flush(cx),
            ClientStreamProj::Tls { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            ClientStreamProj::Tls { stream } => stream.poll_shutdown(cx),
        }
    }
}
