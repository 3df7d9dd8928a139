//! Per-job status fan-out over polled snapshots.
//!
//! One poller runs per watched job id. Every tick it reads the job snapshot
//! and pushes it to all live subscribers, changed or not. A terminal snapshot
//! is delivered once and then every stream for that job closes. When the last
//! subscriber leaves, the poller stops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::registry::JobRegistry;
use crate::state_machine::JobView;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<JobView>,
}

/// Subscribers of one job and the poller currently serving them.
struct Feed {
    poller: u64,
    subscribers: Vec<Subscriber>,
}

struct Inner {
    registry: Arc<JobRegistry>,
    poll_interval: Duration,
    feeds: Mutex<HashMap<String, Feed>>,
    next_id: AtomicU64,
}

impl Inner {
    fn feeds(&self) -> MutexGuard<'_, HashMap<String, Feed>> {
        self.feeds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
pub struct StatusGateway {
    inner: Arc<Inner>,
}

/// A live stream of snapshots for one job. Dropping it unsubscribes.
pub struct Subscription {
    job_id: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<JobView>,
    inner: Arc<Inner>,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Next snapshot, or `None` once the job is terminal and the stream closed.
    pub async fn next(&mut self) -> Option<JobView> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut feeds = self.inner.feeds();
        if let Some(feed) = feeds.get_mut(&self.job_id) {
            feed.subscribers.retain(|s| s.id != self.id);
            if feed.subscribers.is_empty() {
                feeds.remove(&self.job_id);
                debug!(job_id = %self.job_id, "last subscriber left");
            }
        }
    }
}

impl StatusGateway {
    pub fn new(registry: Arc<JobRegistry>, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                poll_interval,
                feeds: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribes to a job's snapshots. Fails with `NotFound` for unknown jobs.
    pub async fn subscribe(&self, job_id: &str) -> AppResult<Subscription> {
        self.inner.registry.snapshot(job_id).await?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let spawn_poller = {
            let mut feeds = self.inner.feeds();
            match feeds.get_mut(job_id) {
                Some(feed) => {
                    feed.subscribers.push(Subscriber { id, tx });
                    None
                }
                None => {
                    let poller = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    feeds.insert(
                        job_id.to_string(),
                        Feed {
                            poller,
                            subscribers: vec![Subscriber { id, tx }],
                        },
                    );
                    Some(poller)
                }
            }
        };

        if let Some(poller) = spawn_poller {
            debug!(job_id, poller, "starting status poller");
            tokio::spawn(poll(self.inner.clone(), job_id.to_string(), poller));
        }

        Ok(Subscription {
            job_id: job_id.to_string(),
            id,
            rx,
            inner: self.inner.clone(),
        })
    }

    /// Number of jobs currently being watched.
    pub fn active_feeds(&self) -> usize {
        self.inner.feeds().len()
    }
}

async fn poll(inner: Arc<Inner>, job_id: String, poller: u64) {
    // `interval` panics on a zero period.
    let mut ticker = tokio::time::interval(inner.poll_interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let snapshot = inner.registry.snapshot(&job_id).await;

        let mut feeds = inner.feeds();
        let Some(feed) = feeds.get_mut(&job_id).filter(|f| f.poller == poller) else {
            debug!(job_id = %job_id, poller, "status poller stopped");
            return;
        };

        match snapshot {
            Ok(view) => {
                let terminal = view.status.is_terminal();
                feed.subscribers.retain(|s| s.tx.send(view.clone()).is_ok());
                if terminal || feed.subscribers.is_empty() {
                    // Dropping the senders closes every stream for this job.
                    feeds.remove(&job_id);
                    debug!(job_id = %job_id, terminal, "status feed closed");
                    return;
                }
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "snapshot read failed, retrying"),
        }
    }
}
