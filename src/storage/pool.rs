//! Bounded connection pool for networked backends.
//!
//! Connections are tracked in a mutex-guarded map keyed by a pool-local id, each
//! entry carrying its [`ConnState`] and the time of its last activity. A
//! semaphore bounds how many connections can be checked out at once; callers
//! beyond the bound wait up to `acquire_timeout` for a permit.
//!
//! The periodic sweep ([`ConnectionPool::start_sweeper`]):
//! * drops entries whose connection reports closed,
//! * never touches entries that are in use,
//! * closes idle entries past `idle_timeout`, except that when that would empty
//!   the pool the most recently used entry stays and is pinged instead.

use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::errors::StorageError;
use crate::config::PoolConfig;

/// A live backend connection the pool can manage.
pub trait PoolConnection: Send + Sync + 'static {
    /// Whether the underlying transport has gone away.
    fn is_closed(&self) -> bool;

    /// Cheap round-trip used to keep an otherwise idle connection alive.
    fn ping(&self) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Opens new connections for a pool.
pub trait Connector: Send + Sync + 'static {
    type Connection: PoolConnection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, StorageError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    InUse,
    Idle,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_size: usize,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(cfg: &PoolConfig) -> Self {
        Self {
            max_size: cfg.max_size.max(1),
            acquire_timeout: Duration::from_millis(cfg.acquire_timeout_ms),
            idle_timeout: Duration::from_secs(cfg.idle_timeout_secs),
            sweep_interval: Duration::from_secs(cfg.sweep_interval_secs.max(1)),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

struct Slot<T> {
    conn: Arc<T>,
    state: ConnState,
    last_activity: Instant,
}

struct PoolInner<C: Connector> {
    connector: C,
    settings: PoolSettings,
    slots: Mutex<HashMap<u64, Slot<C::Connection>>>,
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl<C: Connector> PoolInner<C> {
    fn slots(&self) -> MutexGuard<'_, HashMap<u64, Slot<C::Connection>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, id: u64) {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(&id) else {
            return;
        };
        if slot.conn.is_closed() {
            slots.remove(&id);
            return;
        }
        slot.state = ConnState::Idle;
        slot.last_activity = Instant::now();
    }
}

/// Counts observed at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub in_use: usize,
    pub idle: usize,
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_closed: usize,
    pub evicted: usize,
    pub kept_alive: bool,
    pub probe_failed: bool,
}

impl SweepReport {
    fn changed(&self) -> bool {
        self.removed_closed > 0 || self.evicted > 0 || self.probe_failed
    }
}

pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, settings: PoolSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_size));
        Self {
            inner: Arc::new(PoolInner {
                connector,
                settings,
                slots: Mutex::new(HashMap::new()),
                permits,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Check out a connection, reusing an idle one when possible. Waits for a
    /// permit when `max_size` connections are already checked out.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, StorageError> {
        let settings = &self.inner.settings;
        let permit = match tokio::time::timeout(
            settings.acquire_timeout,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StorageError::PoolClosed),
            Err(_) => {
                return Err(StorageError::PoolExhausted {
                    max_size: settings.max_size,
                    waited_ms: settings.acquire_timeout.as_millis() as u64,
                })
            }
        };

        if let Some((id, conn)) = self.checkout_idle() {
            return Ok(PooledConnection {
                id,
                conn,
                pool: Arc::clone(&self.inner),
                _permit: permit,
            });
        }

        let conn = Arc::new(self.inner.connector.connect().await?);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.slots().insert(
            id,
            Slot {
                conn: Arc::clone(&conn),
                state: ConnState::InUse,
                last_activity: Instant::now(),
            },
        );
        debug!("pool: opened connection #{id}");
        Ok(PooledConnection {
            id,
            conn,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    fn checkout_idle(&self) -> Option<(u64, Arc<C::Connection>)> {
        let mut slots = self.inner.slots();
        slots.retain(|_, slot| slot.state == ConnState::InUse || !slot.conn.is_closed());
        let (id, slot) = slots
            .iter_mut()
            .filter(|(_, slot)| slot.state == ConnState::Idle)
            .max_by_key(|(_, slot)| slot.last_activity)?;
        slot.state = ConnState::InUse;
        slot.last_activity = Instant::now();
        Some((*id, Arc::clone(&slot.conn)))
    }

    /// Return a connection to the idle set. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection<C>) {
        drop(conn);
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.inner.slots();
        let in_use = slots
            .values()
            .filter(|slot| slot.state == ConnState::InUse)
            .count();
        PoolStats {
            total: slots.len(),
            in_use,
            idle: slots.len() - in_use,
        }
    }

    pub fn state_of(&self, id: u64) -> Option<ConnState> {
        self.inner.slots().get(&id).map(|slot| slot.state)
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    /// Run one sweep as if the current time were `now`.
    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        let idle_timeout = self.inner.settings.idle_timeout;
        let mut report = SweepReport::default();
        let mut evicted: Vec<Arc<C::Connection>> = Vec::new();

        let probe = {
            let mut slots = self.inner.slots();
            slots.retain(|_, slot| {
                let closed = slot.conn.is_closed();
                if closed {
                    report.removed_closed += 1;
                }
                !closed
            });

            let mut expired: Vec<(u64, Instant)> = slots
                .iter()
                .filter(|(_, slot)| {
                    slot.state == ConnState::Idle
                        && now.saturating_duration_since(slot.last_activity) > idle_timeout
                })
                .map(|(id, slot)| (*id, slot.last_activity))
                .collect();

            let mut survivor = None;
            if !expired.is_empty() && expired.len() == slots.len() {
                expired.sort_by_key(|(_, last)| *last);
                survivor = expired.pop().map(|(id, _)| id);
            }

            for (id, _) in expired {
                if let Some(slot) = slots.remove(&id) {
                    evicted.push(slot.conn);
                }
            }
            report.evicted = evicted.len();

            survivor.and_then(|id| slots.get(&id).map(|slot| (id, Arc::clone(&slot.conn))))
        };
        drop(evicted);

        if let Some((id, conn)) = probe {
            report.kept_alive = true;
            if let Err(e) = conn.ping().await {
                warn!("pool: keep-alive probe on connection #{id} failed: {e}");
                report.probe_failed = true;
                let mut slots = self.inner.slots();
                if slots.get(&id).is_some_and(|slot| slot.state == ConnState::Idle) {
                    slots.remove(&id);
                }
            }
        }
        report
    }

    /// Spawn the periodic sweep. The task stops on its own once every handle to
    /// the pool has been dropped.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        let weak: Weak<PoolInner<C>> = Arc::downgrade(&self.inner);
        let period = self.inner.settings.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let pool = ConnectionPool { inner };
                let report = pool.sweep().await;
                if report.changed() {
                    let stats = pool.stats();
                    debug!(
                        "pool sweep: closed={} evicted={} probe_failed={} total={} in_use={}",
                        report.removed_closed,
                        report.evicted,
                        report.probe_failed,
                        stats.total,
                        stats.in_use
                    );
                }
            }
            debug!("pool sweeper stopped");
        })
    }

    /// Refuse new checkouts and drop every idle connection.
    pub fn close(&self) {
        self.inner.permits.close();
        self.inner
            .slots()
            .retain(|_, slot| slot.state == ConnState::InUse);
    }
}

/// A checked-out connection. Returns to the idle set when dropped, on every
/// path including errors.
pub struct PooledConnection<C: Connector> {
    id: u64,
    conn: Arc<C::Connection>,
    pool: Arc<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}
