//! FanoutRegistry - one live task per connected subscriber
//!
//! `connect(user_id)` starts a subscriber task unless one is already
//! running for that user, in which case the new socket joins the existing
//! broadcast room. Every period the task reads the user's watch list, takes
//! the latest record of each watched server and publishes them as one
//! [`FanoutFrame`].
//!
//! `disconnect(user_id)` drops one socket. When the last one is gone the
//! entry is removed and the task is told to stop. Publishing goes through
//! the registry lock and checks the entry's generation, so once
//! `disconnect` returns no further frame reaches that user, and a
//! reconnect always gets a fresh task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, trace};

use super::messages::FanoutFrame;
use crate::storage::{PortalStore, StorageResult};
use crate::util;

/// Frames buffered per subscriber before slow sockets start lagging
const ROOM_CAPACITY: usize = 16;

struct Subscriber {
    generation: u64,
    connections: usize,
    frames: broadcast::Sender<FanoutFrame>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

type Subscribers = Arc<Mutex<HashMap<i64, Subscriber>>>;

fn lock(subscribers: &Subscribers) -> MutexGuard<'_, HashMap<i64, Subscriber>> {
    subscribers.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct FanoutRegistry {
    store: Arc<dyn PortalStore>,
    period: Duration,
    subscribers: Subscribers,
    generations: Arc<AtomicU64>,
}

impl FanoutRegistry {
    pub fn new(store: Arc<dyn PortalStore>, period: Duration) -> Self {
        Self {
            store,
            period,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registers one socket of `user_id` and returns its frame receiver
    #[instrument(skip(self))]
    pub fn connect(&self, user_id: i64) -> broadcast::Receiver<FanoutFrame> {
        let mut subscribers = lock(&self.subscribers);

        if let Some(existing) = subscribers.get_mut(&user_id) {
            existing.connections += 1;
            debug!(
                "subscriber task already running ({} connections)",
                existing.connections
            );
            return existing.frames.subscribe();
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (frames, receiver) = broadcast::channel(ROOM_CAPACITY);
        let (stop, stop_rx) = oneshot::channel();

        let task = SubscriberTask {
            user_id,
            generation,
            store: self.store.clone(),
            period: self.period,
            subscribers: self.subscribers.clone(),
        };

        subscribers.insert(
            user_id,
            Subscriber {
                generation,
                connections: 1,
                frames,
                stop: Some(stop),
                task: tokio::spawn(task.run(stop_rx)),
            },
        );

        info!("started fan-out task for user {user_id}");
        receiver
    }

    /// Releases one socket of `user_id`. Returns `true` if this stopped the
    /// user's task.
    #[instrument(skip(self))]
    pub fn disconnect(&self, user_id: i64) -> bool {
        let mut subscribers = lock(&self.subscribers);

        let Some(entry) = subscribers.get_mut(&user_id) else {
            return false;
        };

        entry.connections = entry.connections.saturating_sub(1);
        if entry.connections > 0 {
            return false;
        }

        if let Some(mut entry) = subscribers.remove(&user_id)
            && let Some(stop) = entry.stop.take()
        {
            let _ = stop.send(());
        }

        info!("stopped fan-out task for user {user_id}");
        true
    }

    pub fn is_active(&self, user_id: i64) -> bool {
        lock(&self.subscribers).contains_key(&user_id)
    }

    pub fn active_subscribers(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Stops every subscriber task
    pub fn shutdown(&self) {
        let drained: Vec<Subscriber> = lock(&self.subscribers).drain().map(|(_, s)| s).collect();

        for subscriber in drained {
            subscriber.task.abort();
        }
    }
}

struct SubscriberTask {
    user_id: i64,
    generation: u64,
    store: Arc<dyn PortalStore>,
    period: Duration,
    subscribers: Subscribers,
}

impl SubscriberTask {
    #[instrument(skip_all, fields(user_id = self.user_id))]
    async fn run(self, mut stop: oneshot::Receiver<()>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop => break,

                _ = ticker.tick() => {
                    match self.collect().await {
                        Ok(Some(frame)) => {
                            if !self.publish(frame) {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => error!("failed to read latest records: {e}"),
                    }
                }
            }
        }

        self.release();
        debug!("fan-out task finished");
    }

    async fn collect(&self) -> StorageResult<Option<FanoutFrame>> {
        let watched = self.store.watched_servers(self.user_id).await?;
        if watched.is_empty() {
            trace!("user watches no servers");
            return Ok(None);
        }

        let mut data = Vec::with_capacity(watched.len());
        for server_id in watched {
            if let Some(record) = self.store.latest_performance(server_id).await? {
                data.push(record);
            }
        }

        if data.is_empty() {
            trace!("no records for watched servers yet");
            return Ok(None);
        }

        Ok(Some(FanoutFrame::new(self.user_id, data, util::now())))
    }

    /// Sends `frame` if this task still owns the user's entry
    fn publish(&self, frame: FanoutFrame) -> bool {
        let subscribers = lock(&self.subscribers);

        match subscribers.get(&self.user_id) {
            Some(entry) if entry.generation == self.generation => {
                let _ = entry.frames.send(frame);
                true
            }
            _ => false,
        }
    }

    /// Removes the entry if it is still ours
    fn release(&self) {
        let mut subscribers = lock(&self.subscribers);

        if subscribers
            .get(&self.user_id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            subscribers.remove(&self.user_id);
        }
    }
}
