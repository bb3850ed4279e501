// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;

use super::{DecoderWorker, Device, WorkerId};
use crate::error::{DecoderError, TranslationError};
use crate::protocols::LanguageDirection;

/// Snapshot of how many workers can currently serve requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub alive: usize,
    pub total: usize,
}

impl Availability {
    pub fn is_available(&self) -> bool {
        self.alive > 0
    }
}

struct Slot {
    id: WorkerId,
    worker: Box<dyn DecoderWorker>,
    last_direction: Option<LanguageDirection>,
    failed: bool,
}

struct PoolState {
    idle: VecDeque<Slot>,
    alive: usize,
    /// Live workers per direction, checked out or idle.
    live: HashMap<LanguageDirection, usize>,
    closed: bool,
}

impl PoolState {
    fn can_serve(&self, direction: &LanguageDirection) -> bool {
        self.live.get(direction).is_some_and(|&count| count > 0)
    }

    fn worker_died(&mut self, worker: &dyn DecoderWorker) {
        self.alive -= 1;
        for direction in worker.directions() {
            if let Some(count) = self.live.get_mut(direction) {
                *count = count.saturating_sub(1);
            }
        }
    }

    fn worker_recovered(&mut self, worker: &dyn DecoderWorker) {
        self.alive += 1;
        for direction in worker.directions() {
            *self.live.entry(direction.clone()).or_default() += 1;
        }
    }

    /// Prefers an idle worker that last served `direction`, then the longest idle one.
    fn select(&self, direction: &LanguageDirection) -> Option<usize> {
        self.idle
            .iter()
            .position(|slot| {
                slot.last_direction.as_ref() == Some(direction) && slot.worker.supports(direction)
            })
            .or_else(|| {
                self.idle
                    .iter()
                    .position(|slot| slot.worker.supports(direction))
            })
    }
}

struct PoolInner {
    state: Mutex<PoolState>,
    available: Condvar,
    supported: HashSet<LanguageDirection>,
    total: usize,
    availability: watch::Sender<Availability>,
    respawns: Mutex<Vec<JoinHandle<()>>>,
}

/// A fixed set of decoder workers lent out one caller at a time.
///
/// Checking out a worker blocks until one that supports the requested
/// direction is idle. A worker found dead on return is restarted on a
/// background thread and rejoins the pool once it is healthy again; while no
/// live worker supports the requested direction, checkouts fail with
/// [`TranslationError::DecoderUnavailable`].
#[derive(Clone)]
pub struct DecoderWorkerPool {
    inner: Arc<PoolInner>,
}

impl DecoderWorkerPool {
    pub fn new(workers: Vec<Box<dyn DecoderWorker>>) -> Self {
        let supported: HashSet<LanguageDirection> = workers
            .iter()
            .flat_map(|worker| worker.directions().iter().cloned())
            .collect();
        let total = workers.len();
        let mut live: HashMap<LanguageDirection, usize> = HashMap::new();
        for direction in workers.iter().flat_map(|worker| worker.directions()) {
            *live.entry(direction.clone()).or_default() += 1;
        }
        let idle: VecDeque<Slot> = workers
            .into_iter()
            .enumerate()
            .map(|(i, worker)| Slot {
                id: WorkerId(i),
                worker,
                last_direction: None,
                failed: false,
            })
            .collect();

        let (availability, _) = watch::channel(Availability {
            alive: total,
            total,
        });

        tracing::info!(workers = total, directions = supported.len(), "decoder pool ready");

        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    idle,
                    alive: total,
                    live,
                    closed: false,
                }),
                available: Condvar::new(),
                supported,
                total,
                availability,
                respawns: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Starts one worker per device in parallel.
    ///
    /// If any worker fails to start, the ones that did start are shut down and
    /// the first error is returned.
    pub fn start<F>(devices: &[Device], factory: F) -> Result<Self, DecoderError>
    where
        F: Fn(Device) -> Result<Box<dyn DecoderWorker>, DecoderError> + Sync,
    {
        let results: Vec<Result<Box<dyn DecoderWorker>, DecoderError>> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = devices
                    .iter()
                    .map(|&device| {
                        let factory = &factory;
                        scope.spawn(move || {
                            tracing::info!(%device, "starting decoder worker");
                            factory(device)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(DecoderError::msg("decoder worker initializer panicked"))
                        })
                    })
                    .collect()
            });

        let mut workers = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(worker) => workers.push(worker),
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(err) => tracing::error!(error = %err, "decoder worker failed to start"),
            }
        }

        if let Some(err) = first_error {
            for mut worker in workers {
                worker.shutdown();
            }
            return Err(err);
        }
        Ok(Self::new(workers))
    }

    /// Checks out a worker for `direction`, blocking until one is idle.
    pub fn take(&self, direction: &LanguageDirection) -> Result<WorkerLease, TranslationError> {
        self.checkout(direction, None)?
            .ok_or(TranslationError::DecoderUnavailable)
    }

    /// Like [`take`](Self::take), returning `Ok(None)` if no worker frees up within `timeout`.
    pub fn poll(
        &self,
        direction: &LanguageDirection,
        timeout: Duration,
    ) -> Result<Option<WorkerLease>, TranslationError> {
        self.checkout(direction, Some(Instant::now() + timeout))
    }

    /// Returns a worker early. Dropping the lease has the same effect.
    pub fn release(&self, lease: WorkerLease) {
        drop(lease);
    }

    pub fn supports(&self, direction: &LanguageDirection) -> bool {
        self.inner.supported.contains(direction)
    }

    pub fn directions(&self) -> Vec<LanguageDirection> {
        self.inner.supported.iter().cloned().collect()
    }

    /// Number of worker slots, dead or alive.
    pub fn size(&self) -> usize {
        self.inner.total
    }

    pub fn alive(&self) -> usize {
        self.inner.state.lock().alive
    }

    pub fn idle(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Receives a new value every time a worker dies, recovers, or the pool closes.
    pub fn subscribe(&self) -> watch::Receiver<Availability> {
        self.inner.availability.subscribe()
    }

    /// Stops lending workers, shuts down idle ones and waits for pending restarts.
    ///
    /// Workers still checked out are shut down when returned.
    pub fn close(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            self.inner.available.notify_all();
            std::mem::take(&mut state.idle)
        };

        for mut slot in idle {
            slot.worker.shutdown();
        }
        self.inner.publish(0);

        let handles = std::mem::take(&mut *self.inner.respawns.lock());
        for handle in handles {
            if let Err(e) = handle.join() {
                tracing::error!("Decoder restart thread panicked during shutdown: {:?}", e);
            }
        }
        tracing::info!("decoder pool closed");
    }

    fn checkout(
        &self,
        direction: &LanguageDirection,
        deadline: Option<Instant>,
    ) -> Result<Option<WorkerLease>, TranslationError> {
        if !self.supports(direction) {
            return Err(TranslationError::UnsupportedLanguage(direction.clone()));
        }

        let mut state = self.inner.state.lock();
        loop {
            // re-checked after every wake-up: the last worker for this
            // direction may have died while we waited
            if state.closed || !state.can_serve(direction) {
                return Err(TranslationError::DecoderUnavailable);
            }
            if let Some(slot) = state.select(direction).and_then(|i| state.idle.remove(i)) {
                return Ok(Some(WorkerLease {
                    slot: Some(slot),
                    direction: direction.clone(),
                    pool: Arc::clone(&self.inner),
                }));
            }
            match deadline {
                Some(deadline) => {
                    if self.inner.available.wait_until(&mut state, deadline).timed_out() {
                        return Ok(None);
                    }
                }
                None => self.inner.available.wait(&mut state),
            }
        }
    }
}

impl PoolInner {
    fn release(self: &Arc<Self>, mut slot: Slot) {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            slot.worker.shutdown();
            return;
        }

        if slot.failed || !slot.worker.is_alive() {
            state.worker_died(slot.worker.as_ref());
            let alive = state.alive;
            // waiters must observe directions left without live workers
            self.available.notify_all();
            drop(state);

            tracing::warn!(worker = %slot.id, device = %slot.worker.device(), alive, "decoder worker died; restarting");
            self.publish(alive);
            self.respawn(slot);
            return;
        }

        state.idle.push_back(slot);
        self.available.notify_all();
    }

    fn respawn(self: &Arc<Self>, slot: Slot) {
        let id = slot.id;
        let pool = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("decoder-restart-{}", id.0))
            .spawn(move || pool.restart(slot));

        match spawned {
            Ok(handle) => {
                let mut respawns = self.respawns.lock();
                respawns.retain(|handle| !handle.is_finished());
                respawns.push(handle);
            }
            Err(e) => tracing::error!(worker = %id, error = %e, "failed to spawn decoder restart thread"),
        }
    }

    fn restart(&self, mut slot: Slot) {
        if let Err(e) = slot.worker.restart() {
            tracing::error!(worker = %slot.id, error = %e, "decoder worker restart failed; slot stays offline");
            return;
        }

        slot.failed = false;
        slot.last_direction = None;

        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            slot.worker.shutdown();
            return;
        }
        state.worker_recovered(slot.worker.as_ref());
        let alive = state.alive;
        tracing::info!(worker = %slot.id, alive, "decoder worker restarted");
        state.idle.push_back(slot);
        self.available.notify_all();
        drop(state);

        self.publish(alive);
    }

    fn publish(&self, alive: usize) {
        self.availability.send_replace(Availability {
            alive,
            total: self.total,
        });
    }
}

/// Exclusive use of one worker. Returned to the pool on drop.
pub struct WorkerLease {
    slot: Option<Slot>,
    direction: LanguageDirection,
    pool: Arc<PoolInner>,
}

impl WorkerLease {
    pub fn id(&self) -> WorkerId {
        self.slot().id
    }

    /// Direction the worker was checked out for.
    pub fn direction(&self) -> &LanguageDirection {
        &self.direction
    }

    /// Flags the worker as unusable; it is restarted instead of returned to the idle set.
    pub fn mark_failed(&mut self) {
        if let Some(slot) = self.slot.as_mut() {
            slot.failed = true;
        }
    }

    fn slot(&self) -> &Slot {
        self.slot.as_ref().expect("lease holds its worker until dropped")
    }
}

impl Deref for WorkerLease {
    type Target = dyn DecoderWorker;

    fn deref(&self) -> &Self::Target {
        self.slot().worker.as_ref()
    }
}

impl DerefMut for WorkerLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.slot
            .as_mut()
            .expect("lease holds its worker until dropped")
            .worker
            .as_mut()
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if let Some(mut slot) = self.slot.take() {
            slot.last_direction = Some(self.direction.clone());
            self.pool.release(slot);
        }
    }
}

impl std::fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLease")
            .field("id", &self.slot.as_ref().map(|slot| slot.id))
            .field("direction", &self.direction)
            .finish()
    }
}
