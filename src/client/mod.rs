//! Client orchestration
//!
//! Public entry point binding configuration, the round-robin connection
//! pool, and the UDP session pool. Stream creation rotates the pool under a
//! client-wide lock; liveness probing and reconnection happen per slot, so a
//! reconnecting slot never blocks the others.

mod timed_conn;
mod udp;

use crate::config::Config;
use crate::pconn::{LinkOpener, PconnError};
use crate::protocol::ProtocolError;
use crate::rotor::Rotor;
use crate::transport::{Conn, Dialer, Strm, TransportError};
use std::sync::Arc;
use self::timed_conn::TimedConn;
use self::udp::UdpPool;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Backoff between stream-open attempts is capped here.
const MAX_STREAM_BACKOFF: Duration = Duration::from_secs(2);

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("packet conn error: {0}")]
    Pconn(#[from] PconnError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("control frame error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("stream open retries exhausted after {0} attempts")]
    StreamRetriesExhausted(usize),

    #[error("failed to resolve UDP target {addr}: {source}")]
    Resolve {
        addr: String,
        source: std::io::Error,
    },

    #[error("connection pool is empty")]
    PoolEmpty,

    #[error("client shut down")]
    Cancelled,
}

/// Tunnel client: connection pool plus UDP session pool.
pub struct Client {
    cfg: Arc<Config>,
    dialer: Arc<dyn Dialer>,
    link: Arc<dyn LinkOpener>,
    shutdown: CancellationToken,
    pool: Mutex<Rotor<Arc<TimedConn>>>,
    udp_pool: Arc<UdpPool>,
}

impl Client {
    /// Bind configuration to an engine dialer (selected by
    /// [`crate::config::Protocol`]) and a link-layer opener. Nothing is
    /// dialed until [`Client::start`].
    pub fn new(
        cfg: Config,
        dialer: Arc<dyn Dialer>,
        link: Arc<dyn LinkOpener>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg: Arc::new(cfg),
            dialer,
            link,
            shutdown,
            pool: Mutex::new(Rotor::default()),
            udp_pool: Arc::new(UdpPool::new()),
        })
    }

    /// Dial the configured number of connections sequentially; any failure
    /// aborts start-up. On success, spawns the shutdown watcher and the
    /// idle-session sweeper.
    pub async fn start(self: &Arc<Self>) -> Result<(), ClientError> {
        let mut pool = self.pool.lock().await;
        for i in 0..self.cfg.transport.conns {
            match TimedConn::connect(
                Arc::clone(&self.cfg),
                Arc::clone(&self.dialer),
                Arc::clone(&self.link),
                self.shutdown.clone(),
            )
            .await
            {
                Ok(tc) => {
                    debug!("client connection {} established", i + 1);
                    pool.push(tc);
                }
                Err(err) => {
                    error!("failed to establish connection {}: {err}", i + 1);
                    // no watcher runs yet, so the partial pool is torn down
                    // here before the error surfaces
                    for tc in pool.items() {
                        tc.close().await;
                    }
                    *pool = Rotor::default();
                    return Err(err);
                }
            }
        }
        drop(pool);

        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.shutdown.cancelled().await;
            let pool = client.pool.lock().await;
            for tc in pool.items() {
                tc.close().await;
            }
            client.udp_pool.close_all();
            info!("client shutdown complete");
        });

        tokio::spawn(udp::sweep_loop(
            Arc::clone(&self.udp_pool),
            self.shutdown.clone(),
        ));

        info!(
            "client started: {} -> {} ({} connections)",
            self.cfg.network.local_addr, self.cfg.server.addr, self.cfg.transport.conns
        );
        Ok(())
    }

    /// The next pooled connection in round-robin order, re-announced and
    /// probed for liveness (recreated if the probe fails).
    async fn new_conn(&self) -> Result<Arc<dyn Conn>, ClientError> {
        let tc = {
            let mut pool = self.pool.lock().await;
            pool.next().cloned().ok_or(ClientError::PoolEmpty)?
        };

        let announcer = Arc::clone(&tc);
        tokio::spawn(async move { announcer.announce_current().await });

        tc.acquire().await
    }

    /// Open a new logical stream, retrying transient failures with bounded
    /// backoff. Exhaustion and shutdown surface as errors rather than
    /// stalling forever.
    pub async fn new_stream(&self) -> Result<Arc<dyn Strm>, ClientError> {
        let limit = self.cfg.transport.stream_retry_limit;
        let mut backoff = self.cfg.transport.stream_retry_backoff();

        for attempt in 1..=limit {
            if self.shutdown.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            match self.try_stream().await {
                Ok(strm) => {
                    debug!("new stream {} created", strm.id());
                    return Ok(strm);
                }
                Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                Err(err) => {
                    debug!("stream open attempt {attempt}/{limit} failed: {err}");
                    if attempt == limit {
                        break;
                    }
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(ClientError::Cancelled),
                        _ = time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_STREAM_BACKOFF);
                }
            }
        }
        Err(ClientError::StreamRetriesExhausted(limit))
    }

    async fn try_stream(&self) -> Result<Arc<dyn Strm>, ClientError> {
        let conn = self.new_conn().await?;
        Ok(conn.open_stream().await?)
    }
}
