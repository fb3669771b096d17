//! Deduplicates concurrent identical streaming requests onto one shared
//! upstream connection.
//!
//! When two callers ask for the same (provider, model, request body) while a
//! matching upstream stream is already in flight, the second caller
//! subscribes to the first instead of opening its own connection. Keying is
//! a SHA-256 digest of the normalized request, the same content-addressing
//! approach a caching HTTP proxy uses to dedupe identical fetches. A bounded
//! replay buffer lets a late subscriber catch up on chunks it missed between
//! the stream starting and its own subscribe call.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const DEFAULT_REPLAY_CAPACITY: usize = 50;
const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const KEY_HEX_LEN: usize = 16;

/// Content-derived key identifying a deduplicable stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey(String);

impl StreamKey {
    /// `hex(SHA-256(model ∥ body))`, truncated to 16 hex chars — enough
    /// collision resistance for in-process dedup without paying for a full
    /// 64-char key in every map lookup. Deliberately excludes the provider:
    /// two providers serving the same model for the same body are the same
    /// logical request for dedup purposes.
    pub fn compute(model: &str, request_body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(request_body);
        let digest = format!("{:x}", hasher.finalize());
        StreamKey(digest[..KEY_HEX_LEN].to_string())
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub seq: u64,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub enum FanoutError {
    PublisherGone,
}

impl std::fmt::Display for FanoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FanoutError::PublisherGone => write!(f, "stream publisher has gone away"),
        }
    }
}

impl std::error::Error for FanoutError {}

struct SharedStreamInner {
    subscribers: Vec<mpsc::Sender<StreamEvent>>,
    replay: VecDeque<StreamEvent>,
    next_seq: u64,
    finished: bool,
}

/// One in-flight upstream stream, shared by every subscriber that asked for
/// the same content hash while it was active.
pub struct SharedStream {
    key: StreamKey,
    inner: Mutex<SharedStreamInner>,
    replay_capacity: usize,
    last_activity_millis: AtomicU64,
    started_at: Instant,
}

impl SharedStream {
    fn new(key: StreamKey, replay_capacity: usize) -> Self {
        Self {
            key,
            inner: Mutex::new(SharedStreamInner {
                subscribers: Vec::new(),
                replay: VecDeque::with_capacity(replay_capacity),
                next_seq: 0,
                finished: false,
            }),
            replay_capacity,
            last_activity_millis: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    fn touch(&self) {
        self.last_activity_millis
            .store(self.started_at.elapsed().as_millis() as u64, Ordering::Release);
    }

    /// Subscribe to this stream, receiving the buffered replay first and
    /// then live events as they're published.
    pub fn subscribe(&self) -> (mpsc::Receiver<StreamEvent>, Vec<StreamEvent>) {
        let (tx, rx) = mpsc::channel(DEFAULT_SUBSCRIBER_BUFFER);
        let mut inner = self.inner.lock().expect("shared stream poisoned");
        let replay: Vec<StreamEvent> = inner.replay.iter().cloned().collect();
        if !inner.finished {
            inner.subscribers.push(tx);
        }
        (rx, replay)
    }

    /// Called by the stream's owner (the caller who actually opened the
    /// upstream connection) to fan a chunk out to every subscriber.
    /// Slow subscribers that can't keep up are dropped rather than blocking
    /// the publisher — a full channel means a half-dead consumer, not
    /// backpressure worth propagating upstream.
    pub fn publish(&self, data: Bytes) {
        let mut inner = self.inner.lock().expect("shared stream poisoned");
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let event = StreamEvent { seq, data };

        inner.replay.push_back(event.clone());
        if inner.replay.len() > self.replay_capacity {
            inner.replay.pop_front();
        }

        inner.subscribers.retain(|tx| tx.try_send(event.clone()).is_ok());
        drop(inner);
        self.touch();
    }

    /// Mark the stream complete; no further subscribers will be accepted.
    pub fn finish(&self) {
        let mut inner = self.inner.lock().expect("shared stream poisoned");
        inner.finished = true;
        inner.subscribers.clear();
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_activity_millis.load(Ordering::Acquire);
        self.started_at.elapsed().saturating_sub(Duration::from_millis(last))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("shared stream poisoned").subscribers.len()
    }

    fn is_finished(&self) -> bool {
        self.inner.lock().expect("shared stream poisoned").finished
    }
}

/// Registry of in-flight shared streams keyed by content hash.
#[derive(Clone)]
pub struct StreamFanout {
    streams: Arc<Mutex<HashMap<StreamKey, Arc<SharedStream>>>>,
    replay_capacity: usize,
    idle_ttl: Duration,
}

impl StreamFanout {
    pub fn new(replay_capacity: usize, idle_ttl: Duration) -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
            replay_capacity: if replay_capacity == 0 {
                DEFAULT_REPLAY_CAPACITY
            } else {
                replay_capacity
            },
            idle_ttl,
        }
    }

    /// Fetch the existing stream for `key`, or register a fresh one. Returns
    /// whether the caller is the owner (first to register, responsible for
    /// driving the upstream connection and calling `publish`/`finish`) along
    /// with the shared stream handle.
    pub fn get_or_create(&self, key: StreamKey) -> (Arc<SharedStream>, bool) {
        let mut streams = self.streams.lock().expect("fanout registry poisoned");
        if let Some(existing) = streams.get(&key) {
            if !existing.is_finished() {
                return (existing.clone(), false);
            }
        }
        let stream = Arc::new(SharedStream::new(key.clone(), self.replay_capacity));
        streams.insert(key, stream.clone());
        (stream, true)
    }

    /// Remove streams that have finished and have no subscribers, or that
    /// have never had a subscriber and have sat idle past `idle_ttl`.
    /// Intended to run on a periodic sweep. A live, still-subscribed stream
    /// is never removed, no matter how long it has gone since its last
    /// published chunk.
    pub fn sweep(&self) {
        let mut streams = self.streams.lock().expect("fanout registry poisoned");
        streams.retain(|_, stream| {
            let dead = stream.is_finished() && stream.subscriber_count() == 0;
            let stale = !stream.is_finished()
                && stream.subscriber_count() == 0
                && stream.idle_for() > self.idle_ttl;
            !(dead || stale)
        });
    }

    pub async fn run_sweeper(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => self.sweep(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.streams.lock().expect("fanout registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
