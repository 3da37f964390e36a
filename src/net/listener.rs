//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Enforce `max_connections` via semaphore
//! - Shed load when no slot frees up within the accept timeout
//! - Plug into `axum::serve` as a [`Listener`]
//!
//! # Design Decisions
//! - A slot is acquired before accepting, so the kernel backlog absorbs bursts
//! - On timeout one pending connection is accepted and closed immediately,
//!   so the accept loop keeps moving instead of leaving clients hanging
//! - The slot travels with the stream and is released when hyper drops it

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::serve::Listener;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;
use crate::net::connection::{ConnectionCounters, ConnectionGuard};

/// Used when the configured limit is zero.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("failed to bind: {0}")]
    Bind(#[source] io::Error),
}

/// A bounded TCP listener that limits concurrent connections.
#[derive(Debug)]
pub struct LimitedListener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
    accept_timeout: Duration,
    counters: Arc<ConnectionCounters>,
}

impl LimitedListener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ListenerError::InvalidAddress(config.bind_address.clone()))?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;

        Ok(Self::from_tcp(
            listener,
            config.max_connections,
            Duration::from_secs(config.accept_timeout_secs),
        ))
    }

    /// Wrap an already bound listener.
    pub fn from_tcp(inner: TcpListener, max_connections: usize, accept_timeout: Duration) -> Self {
        let max_connections = if max_connections == 0 {
            DEFAULT_MAX_CONNECTIONS
        } else {
            max_connections
        };

        if let Ok(addr) = inner.local_addr() {
            tracing::info!(
                address = %addr,
                max_connections,
                accept_timeout = ?accept_timeout,
                "Listener bound"
            );
        }

        Self {
            inner,
            slots: Arc::new(Semaphore::new(max_connections)),
            accept_timeout,
            counters: Arc::new(ConnectionCounters::new(max_connections)),
        }
    }

    /// Counters shared with the stats endpoint.
    pub fn counters(&self) -> Arc<ConnectionCounters> {
        Arc::clone(&self.counters)
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    async fn accept_tcp(&mut self) -> (TcpStream, SocketAddr) {
        loop {
            match self.inner.accept().await {
                Ok(accepted) => return accepted,
                Err(e) if is_connection_error(&e) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

impl Listener for LimitedListener {
    type Io = LimitedStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let slot = tokio::time::timeout(
                self.accept_timeout,
                Arc::clone(&self.slots).acquire_owned(),
            )
            .await;

            if let Ok(Ok(permit)) = slot {
                let (stream, addr) = self.accept_tcp().await;
                let guard = self.counters.open();
                tracing::trace!(peer_addr = %addr, "Connection accepted");
                return (
                    LimitedStream {
                        stream,
                        _permit: permit,
                        _guard: guard,
                    },
                    addr,
                );
            }

            let (stream, addr) = self.accept_tcp().await;
            drop(stream);
            self.counters.reject();
            tracing::warn!(
                peer_addr = %addr,
                current = self.counters.current(),
                "Connection limit reached, connection dropped"
            );
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// A TCP stream holding a connection slot until dropped.
#[derive(Debug)]
pub struct LimitedStream {
    stream: TcpStream,
    _permit: OwnedSemaphorePermit,
    _guard: ConnectionGuard,
}

impl AsyncRead for LimitedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for LimitedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }
}
