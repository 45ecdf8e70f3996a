//! Destinations for streamed container output.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

/// Where a driver writes the invocation image's stdout or stderr.
pub type OutputSink = Box<dyn AsyncWrite + Send + Sync + Unpin>;

// ─── BufferSink ───────────────────────────────────────────────────────────

/// An in-memory sink whose clones share one buffer.
#[derive(Clone, Debug, Default)]
pub struct BufferSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        match self.buf.lock() {
            Ok(b) => b.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.contents().is_empty()
    }

    pub fn boxed(&self) -> OutputSink {
        Box::new(self.clone())
    }

    fn append(&self, data: &[u8]) {
        match self.buf.lock() {
            Ok(mut b) => b.extend_from_slice(data),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(data),
        }
    }
}

impl AsyncWrite for BufferSink {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        self.append(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// ─── TeeSink ──────────────────────────────────────────────────────────────

/// Forwards writes to a primary sink and keeps a copy of everything the
/// primary accepted.
pub struct TeeSink {
    primary: OutputSink,
    copy: BufferSink,
}

impl TeeSink {
    pub fn new(primary: OutputSink, copy: BufferSink) -> Self {
        Self { primary, copy }
    }
}

impl AsyncWrite for TeeSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let polled = Pin::new(&mut self.primary).poll_write(cx, data);
        if let Poll::Ready(Ok(n)) = &polled {
            self.copy.append(&data[..*n]);
        }
        polled
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.primary).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.primary).poll_shutdown(cx)
    }
}
