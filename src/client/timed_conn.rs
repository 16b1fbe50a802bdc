//! Self-healing pool slot
//!
//! Each slot owns one multiplexed connection and guarantees that whatever it
//! hands out answered a liveness probe. A dead connection is closed and
//! replaced by redialing at a fixed interval until a dial succeeds; every
//! freshly dialed connection announces our fingerprint profiles on a
//! dedicated control stream before it is handed back, so the peer learns the
//! disguise to apply before ordinary traffic flows.

use super::ClientError;
use crate::config::Config;
use crate::pconn::{LinkOpener, PacketConn};
use crate::protocol::ControlFrame;
use crate::transport::{Conn, Dialer};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fixed delay between redial attempts after a liveness failure.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

struct Slot {
    conn: Arc<dyn Conn>,
    /// When the current connection's fingerprint announcement goes stale.
    expire: Instant,
}

pub(super) struct TimedConn {
    cfg: Arc<Config>,
    dialer: Arc<dyn Dialer>,
    link: Arc<dyn LinkOpener>,
    shutdown: CancellationToken,
    slot: Mutex<Slot>,
}

impl TimedConn {
    /// Dial the initial connection for this slot. Failure here aborts
    /// client start-up.
    pub(super) async fn connect(
        cfg: Arc<Config>,
        dialer: Arc<dyn Dialer>,
        link: Arc<dyn LinkOpener>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, ClientError> {
        let conn = create_conn(&cfg, &*dialer, &*link, &shutdown).await?;
        let expire = Instant::now() + cfg.transport.auto_expire();
        let tc = Arc::new(Self {
            cfg,
            dialer,
            link,
            shutdown,
            slot: Mutex::new(Slot { conn, expire }),
        });
        if let Some(every) = tc.cfg.transport.re_announce() {
            tokio::spawn(re_announce_loop(Arc::clone(&tc), every));
        }
        Ok(tc)
    }

    /// The slot's connection, probed for liveness. On probe failure the dead
    /// connection is closed and replaced, blocking until a redial succeeds
    /// or the client shuts down. Only this slot is held during the wait;
    /// other pool slots stay usable.
    pub(super) async fn acquire(&self) -> Result<Arc<dyn Conn>, ClientError> {
        let mut slot = self.slot.lock().await;
        if slot.conn.ping(false).await.is_ok() {
            return Ok(Arc::clone(&slot.conn));
        }

        info!("connection lost, retrying");
        slot.conn.close().await;
        let conn = self.wait_conn().await?;
        slot.conn = Arc::clone(&conn);
        slot.expire = Instant::now() + self.cfg.transport.auto_expire();
        Ok(conn)
    }

    /// Redial at a fixed interval until one dial succeeds. Unbounded, but
    /// cancellation-aware: shutdown is the only other way out.
    async fn wait_conn(&self) -> Result<Arc<dyn Conn>, ClientError> {
        loop {
            if self.shutdown.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            match create_conn(&self.cfg, &*self.dialer, &*self.link, &self.shutdown).await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    debug!("redial failed: {err}");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(ClientError::Cancelled),
                        _ = time::sleep(RECONNECT_INTERVAL) => {}
                    }
                }
            }
        }
    }

    /// Best-effort fingerprint re-announce on the current connection. A
    /// successful announce pushes the expiry forward.
    pub(super) async fn announce_current(&self) {
        let conn = {
            let slot = self.slot.lock().await;
            Arc::clone(&slot.conn)
        };
        match announce(&self.cfg, &*conn).await {
            Ok(()) => {
                let mut slot = self.slot.lock().await;
                slot.expire = Instant::now() + self.cfg.transport.auto_expire();
            }
            Err(err) => debug!("fingerprint announce failed: {err}"),
        }
    }

    pub(super) async fn close(&self) {
        let slot = self.slot.lock().await;
        slot.conn.close().await;
    }
}

/// Dial a fresh packet conn and engine connection, then announce the
/// fingerprint profiles before handing the connection out.
async fn create_conn(
    cfg: &Config,
    dialer: &dyn Dialer,
    link: &dyn LinkOpener,
    shutdown: &CancellationToken,
) -> Result<Arc<dyn Conn>, ClientError> {
    let pconn = PacketConn::new(shutdown, &cfg.network, link)?;
    let conn: Arc<dyn Conn> = Arc::from(dialer.dial(cfg.server.addr, pconn).await?);
    announce(cfg, &*conn).await?;
    Ok(conn)
}

/// Open a dedicated control stream and write the fingerprint announcement.
async fn announce(cfg: &Config, conn: &dyn Conn) -> Result<(), ClientError> {
    let strm = conn.open_stream().await?;
    ControlFrame::Fingerprint(cfg.network.fingerprints.clone())
        .write_to(&*strm)
        .await?;
    Ok(())
}

/// Periodic fingerprint re-announce, active only when configured. Ticks at
/// the configured interval and re-announces once the slot's expiry passes.
async fn re_announce_loop(tc: Arc<TimedConn>, every: Duration) {
    let mut ticker = time::interval(every);
    ticker.tick().await; // the creation-time announce already happened
    loop {
        tokio::select! {
            _ = tc.shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let due = {
                    let slot = tc.slot.lock().await;
                    slot.expire
                };
                if Instant::now() >= due {
                    tc.announce_current().await;
                }
            }
        }
    }
}
