//! Public mirror rotation
//!
//! The rotator owns the pool of public mirrors and periodically reselects
//! the active one. Selection is sampling-without-replacement over a
//! revolving pool: the active target is held out of the pool while current,
//! so two consecutive picks can never be the same physical target when
//! more than one mirror is configured.

use std::sync::Arc;
use std::time::Duration;

use gatekeeper_proxy::RegistryTarget;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::events::{EventBus, ProxyEvent};

/// One completed rotation, for telemetry.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub previous: Arc<RegistryTarget>,
    pub next: Arc<RegistryTarget>,
}

/// Owns the rotation state; the engine and merger only ever read `current`.
pub struct Rotator {
    /// Active target, swapped atomically on rotation
    current: RwLock<Arc<RegistryTarget>>,
    /// Unused targets; the current target is held out while active
    pool: Mutex<Vec<Arc<RegistryTarget>>>,
    events: EventBus,
}

impl Rotator {
    /// Create a rotator over the configured public targets.
    ///
    /// The first target starts out current and the rest form the pool.
    /// Returns `None` for an empty target list.
    pub fn new(targets: Vec<Arc<RegistryTarget>>, events: EventBus) -> Option<Self> {
        let mut targets = targets.into_iter();
        let current = targets.next()?;

        Some(Self {
            current: RwLock::new(current),
            pool: Mutex::new(targets.collect()),
            events,
        })
    }

    /// The active public mirror. Never blocks on an in-progress rotation
    /// beyond the pointer swap itself.
    pub fn current(&self) -> Arc<RegistryTarget> {
        self.current.read().clone()
    }

    /// Number of mirrors not currently active.
    pub fn pool_size(&self) -> usize {
        self.pool.lock().len()
    }

    /// Draw a uniformly random pool member, make it current and return the
    /// previously-current target to the back of the pool.
    ///
    /// With an empty pool (single configured mirror) this is a no-op.
    pub fn rotate(&self) -> Option<Rotation> {
        let mut pool = self.pool.lock();

        if pool.is_empty() {
            return None;
        }

        let index = rand::rng().random_range(0..pool.len());
        let next = pool.remove(index);

        let previous = {
            let mut current = self.current.write();
            std::mem::replace(&mut *current, next.clone())
        };

        pool.push(previous.clone());
        drop(pool);

        debug!("Rotated public mirror: {} -> {}", previous, next);
        self.events.emit(ProxyEvent::Rotation {
            previous: previous.href.clone(),
            next: next.href.clone(),
        });

        Some(Rotation { previous, next })
    }
}

/// Spawn the background rotation task.
///
/// Rotation fires immediately at startup and then on the fixed interval.
/// With a single configured mirror no timer runs at all; the handle is
/// `None` and `current` never changes. The returned handle is aborted on
/// shutdown.
pub fn spawn_rotation_task(
    rotator: Arc<Rotator>,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    if rotator.pool_size() == 0 {
        debug!("Single public mirror configured, rotation disabled");
        return None;
    }

    info!("Starting mirror rotation task (interval: {:?})", interval);

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            // The first tick completes immediately, so the first rotation
            // happens at startup rather than one interval in.
            ticker.tick().await;
            rotator.rotate();
        }
    }))
}
