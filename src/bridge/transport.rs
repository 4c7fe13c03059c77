//! Socket transports for the remote bridge.
//!
//! Both transports open one connection per request, write the request,
//! half-close, then read until the terminator or end of stream. They differ only
//! in the I/O primitive:
//!
//! - [`TokioTransport`] suspends the calling task, never the worker thread.
//! - [`BlockingTransport`] uses std sockets, for callers with no scheduler.

use crate::bridge::protocol::{FrameBuffer, ProtocolError};
use crate::models::CommandDescriptor;
use async_trait::async_trait;
use std::io::{self, Read, Write};
use std::net::{Shutdown, ToSocketAddrs};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::RuntimeFlavor;
use tokio::time::timeout;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("response rejected: {0}")]
    Frame(#[from] ProtocolError),
}

/// One request/response exchange with the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` to `addr` and return the raw response, terminator included
    /// when the backend sent one.
    async fn round_trip(
        &self,
        addr: &str,
        request: &[u8],
        descriptor: &CommandDescriptor,
    ) -> Result<String, TransportError>;
}

/// Non-blocking transport for tasks on the tokio scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTransport;

#[async_trait]
impl Transport for TokioTransport {
    async fn round_trip(
        &self,
        addr: &str,
        request: &[u8],
        descriptor: &CommandDescriptor,
    ) -> Result<String, TransportError> {
        let mut stream = timeout(
            descriptor.connect_timeout,
            tokio::net::TcpStream::connect(addr),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            addr: addr.to_string(),
            timeout: descriptor.connect_timeout,
        })?
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;

        timeout(descriptor.write_timeout, async {
            stream.write_all(request).await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| TransportError::WriteTimeout(descriptor.write_timeout))??;

        let mut frame = FrameBuffer::new(descriptor.max_frame_bytes);
        timeout(descriptor.read_timeout, async {
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                let n = stream.read(&mut chunk).await?;
                if n == 0 || frame.push(&chunk[..n])? {
                    return Ok::<(), TransportError>(());
                }
            }
        })
        .await
        .map_err(|_| TransportError::ReadTimeout(descriptor.read_timeout))??;

        Ok(frame.into_string())
    }
}

/// Blocking transport on std sockets.
///
/// The read timeout is one deadline for the whole response, not per read. No
/// write timeout is applied; requests fit in the socket buffer.
///
/// Polled from a multi-thread tokio runtime, the blocking section runs under
/// `block_in_place`. On a current-thread runtime it stalls that thread for the
/// whole exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingTransport;

impl BlockingTransport {
    pub fn round_trip_blocking(
        &self,
        addr: &str,
        request: &[u8],
        descriptor: &CommandDescriptor,
    ) -> Result<String, TransportError> {
        let mut stream = connect_blocking(addr, descriptor.connect_timeout)?;
        stream.write_all(request)?;
        stream.shutdown(Shutdown::Write)?;

        let deadline = Instant::now() + descriptor.read_timeout;
        let mut frame = FrameBuffer::new(descriptor.max_frame_bytes);
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .filter(|d| !d.is_zero())
                .ok_or(TransportError::ReadTimeout(descriptor.read_timeout))?;
            stream.set_read_timeout(Some(remaining))?;

            let n = match stream.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Err(TransportError::ReadTimeout(descriptor.read_timeout));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 || frame.push(&chunk[..n])? {
                break;
            }
        }
        Ok(frame.into_string())
    }
}

#[async_trait]
impl Transport for BlockingTransport {
    async fn round_trip(
        &self,
        addr: &str,
        request: &[u8],
        descriptor: &CommandDescriptor,
    ) -> Result<String, TransportError> {
        let on_multi_thread = tokio::runtime::Handle::try_current()
            .is_ok_and(|h| h.runtime_flavor() == RuntimeFlavor::MultiThread);
        if on_multi_thread {
            // Let the runtime move other tasks off this worker while the socket blocks
            return tokio::task::block_in_place(|| self.round_trip_blocking(addr, request, descriptor));
        }
        self.round_trip_blocking(addr, request, descriptor)
    }
}

fn connect_blocking(addr: &str, connect_timeout: Duration) -> Result<std::net::TcpStream, TransportError> {
    let connect_error = |source: io::Error| TransportError::Connect {
        addr: addr.to_string(),
        source,
    };

    let mut last_error = None;
    for socket_addr in addr.to_socket_addrs().map_err(connect_error)? {
        match std::net::TcpStream::connect_timeout(&socket_addr, connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(TransportError::ConnectTimeout {
                    addr: addr.to_string(),
                    timeout: connect_timeout,
                });
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(connect_error(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
    })))
}
