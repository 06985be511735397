//! Transport stream abstraction.
//!
//! The hub speaks over a serial port; tests and simulations drive the same
//! connection code over an in-memory duplex pipe.

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::ClientError;

pin_project! {
    /// A duplex byte stream to a hub.
    #[project = HubStreamProj]
    pub enum HubStream {
        Serial { #[pin] stream: SerialStream },
        Mem { #[pin] stream: DuplexStream },
    }
}

impl HubStream {
    /// Opens the serial device at `path` with the given baud rate.
    pub fn open_serial(path: &str, baud_rate: u32) -> Result<Self, ClientError> {
        let stream = tokio_serial::new(path, baud_rate).open_native_async()?;
        Ok(HubStream::Serial { stream })
    }

    /// Wraps one end of an in-memory pipe.
    pub fn mem(stream: DuplexStream) -> Self {
        HubStream::Mem { stream }
    }
}

impl AsyncRead for HubStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            HubStreamProj::Serial { stream } => stream.poll_read(cx, buf),
            HubStreamProj::Mem { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for HubStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            HubStreamProj::Serial { stream } => stream.poll_write(cx, buf),
            HubStreamProj::Mem { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            HubStreamProj::Serial { stream } => stream.poll_flush(cx),
            HubStreamProj::Mem { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            HubStreamProj::Serial { stream } => stream.poll_shutdown(cx),
            HubStreamProj::Mem { stream } => stream.poll_shutdown(cx),
        }
    }
}
