use std::{
    fmt::Display,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use image::DynamicImage;

use super::config::SessionConfig;

/// Lifecycle phase of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Generating,
}

impl Phase {
    /// Whether an initialize or generate is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Initializing | Self::Generating)
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Generating => write!(f, "generating"),
        }
    }
}

/// Position of the last published preview in a stepped generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepProgress {
    /// 1-based.
    pub step: u32,
    pub total: u32,
}

/// An immutable snapshot of a session.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    /// Strictly increasing across the snapshots of one session.
    pub revision: u64,
    pub config: SessionConfig,
    pub phase: Phase,
    pub last_image: Option<Arc<DynamicImage>>,
    pub last_error: Option<String>,
    pub status_message: String,
    pub progress: Option<StepProgress>,
    pub initialize_duration_ms: Option<u64>,
    pub generate_duration_ms: Option<u64>,
}

struct Published {
    latest: Arc<SessionState>,
    subscribers: Vec<Sender<Arc<SessionState>>>,
}

/// Totally ordered publication of [`SessionState`] snapshots.
pub(crate) struct StatePublisher {
    inner: Mutex<Published>,
}

impl StatePublisher {
    pub(crate) fn new(initial: SessionState) -> Self {
        Self {
            inner: Mutex::new(Published {
                latest: Arc::new(initial),
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Published> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn latest(&self) -> Arc<SessionState> {
        self.lock().latest.clone()
    }

    pub(crate) fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        self.lock().subscribers.push(tx);
        Subscription { rx }
    }

    /// Apply `f` to a copy of the latest snapshot and publish it.
    pub(crate) fn update(&self, f: impl FnOnce(&mut SessionState)) -> Arc<SessionState> {
        let mut published = self.lock();
        let mut next = SessionState::clone(&published.latest);
        f(&mut next);
        Self::publish(&mut published, next)
    }

    /// Like [`StatePublisher::update`], but if `f` fails the copy is discarded and nothing is
    /// published.
    pub(crate) fn try_update<T, E>(
        &self,
        f: impl FnOnce(&mut SessionState) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut published = self.lock();
        let mut next = SessionState::clone(&published.latest);
        let out = f(&mut next)?;
        Self::publish(&mut published, next);
        Ok(out)
    }

    fn publish(published: &mut Published, mut next: SessionState) -> Arc<SessionState> {
        next.revision = published.latest.revision + 1;
        let next = Arc::new(next);
        published
            .subscribers
            .retain(|subscriber| subscriber.send(next.clone()).is_ok());
        published.latest = next.clone();
        next
    }
}

/// Every snapshot published after the subscription was made, in publication order.
///
/// Iteration ends once the session and its worker are gone.
pub struct Subscription {
    rx: Receiver<Arc<SessionState>>,
}

impl Subscription {
    /// Block until the next snapshot.
    pub fn recv(&self) -> Option<Arc<SessionState>> {
        self.rx.recv().ok()
    }

    /// `None` on timeout or when no more snapshots can arrive.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<SessionState>> {
        match self.rx.recv_timeout(timeout) {
            Ok(state) => Some(state),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<Arc<SessionState>> {
        self.rx.try_recv().ok()
    }

    /// All snapshots already published, without blocking.
    pub fn drain(&self) -> Vec<Arc<SessionState>> {
        self.rx.try_iter().collect()
    }
}

impl Iterator for Subscription {
    type Item = Arc<SessionState>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}
