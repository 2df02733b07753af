//! Streaming token aggregator.
//!
//! Ingests interleaved token fragments tagged by originating agent and
//! maintains a debounced, completion-aware mapping of what each agent has
//! said so far. All mutation (ingestion, timer fires, the idle sweep,
//! resets) is serialized behind one mutex; consumers only ever see the
//! published mapping.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

use roundtable_events::{AgentStreams, StreamEntry, TokenFragment};

use crate::markers::{self, FragmentKind};

/// Timing knobs for the aggregator. Defaults match production; tests inject
/// shorter windows.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Quiet window before buffered fragments are published.
    pub debounce: Duration,
    /// Silence after which an active stream is considered stalled.
    pub idle_threshold: Duration,
    /// How often the idle sweep runs.
    pub sweep_interval: Duration,
    /// How long a finalized entry stays visible before removal.
    pub finalize_grace: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
            idle_threshold: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(2),
            finalize_grace: Duration::from_millis(500),
        }
    }
}

/// Unpublished text accumulated for one agent between publishes.
#[derive(Debug, Default)]
struct PendingBuffer {
    text: String,
    message_id: Option<String>,
}

/// The single live timer for one agent: either its debounce timer or the
/// post-finalization grace timer, never both.
#[derive(Debug)]
struct TimerSlot {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy)]
enum TimerAction {
    PublishBuffer,
    RemoveEntry,
}

#[derive(Debug, Default)]
struct AggregatorState {
    streams: AgentStreams,
    pending: HashMap<String, PendingBuffer>,
    timers: HashMap<String, TimerSlot>,
    completed: HashSet<String>,
    next_generation: u64,
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    config: AggregatorConfig,
    state: Mutex<AggregatorState>,
    publisher: watch::Sender<AgentStreams>,
    sweep: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Debounced, completion-aware aggregation of per-agent token streams.
///
/// Cheap to clone; all clones share one state table. Must be created inside
/// a Tokio runtime because it spawns the idle sweep.
#[derive(Debug, Clone)]
pub struct StreamAggregator {
    inner: Arc<Inner>,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::with_config(AggregatorConfig::default())
    }

    pub fn with_config(config: AggregatorConfig) -> Self {
        let (publisher, _) = watch::channel(AgentStreams::new());
        let sweep_interval = config.sweep_interval;
        let idle_threshold = config.idle_threshold;
        let inner = Arc::new(Inner {
            config,
            state: Mutex::new(AggregatorState::default()),
            publisher,
            sweep: std::sync::Mutex::new(None),
        });
        let handle = spawn_idle_sweep(Arc::downgrade(&inner), sweep_interval, idle_threshold);
        if let Ok(mut sweep) = inner.sweep.lock() {
            *sweep = Some(handle);
        }
        Self { inner }
    }

    /// Ingest one inbound fragment.
    ///
    /// Never fails: duplicates are dropped, failure notices become terminal
    /// inactive entries, end markers finalize, everything else buffers
    /// behind the debounce timer. After [`shutdown`](Self::shutdown) this is
    /// a no-op.
    pub async fn handle_fragment(&self, fragment: TokenFragment) {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return;
        }
        if let Some(message_id) = fragment.message_id.as_deref() {
            if state.completed.contains(message_id) {
                tracing::debug!(
                    agent = %fragment.agent_type,
                    message_id,
                    "dropping fragment for completed message"
                );
                return;
            }
        }
        match markers::classify(&fragment.agent_type, &fragment.token) {
            FragmentKind::Failure => self.fail_stream(&mut state, fragment),
            FragmentKind::Completion => self.finish_stream(&mut state, fragment),
            FragmentKind::Content => self.buffer_fragment(&mut state, fragment),
        }
    }

    /// Drop one agent's stream. A supplied `message_id` is registered as
    /// completed so a late duplicate cannot resurrect the message.
    pub async fn reset_agent(&self, agent_type: &str, message_id: Option<String>) {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return;
        }
        cancel_timer(&mut state, agent_type);
        state.pending.remove(agent_type);
        let removed = state.streams.remove(agent_type).is_some();
        if let Some(message_id) = message_id {
            state.completed.insert(message_id);
        }
        if removed {
            publish(&self.inner, &state);
        }
    }

    /// Drop every stream and cancel every in-flight timer. Completed message
    /// ids survive so duplicate suppression outlives a view reset.
    pub async fn reset_all(&self) {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return;
        }
        for (_, slot) in state.timers.drain() {
            slot.handle.abort();
        }
        state.pending.clear();
        state.streams.clear();
        publish(&self.inner, &state);
    }

    /// Clone of the currently published mapping.
    pub fn snapshot(&self) -> AgentStreams {
        self.inner.publisher.borrow().clone()
    }

    /// Receiver that observes every republished mapping.
    pub fn subscribe(&self) -> watch::Receiver<AgentStreams> {
        self.inner.publisher.subscribe()
    }

    /// The published mapping as an async stream. Yields the current value
    /// first, then every republish.
    pub fn watch_stream(&self) -> WatchStream<AgentStreams> {
        WatchStream::new(self.subscribe())
    }

    pub async fn closed(&self) -> bool {
        self.inner.state.lock().await.closed
    }

    /// Tear the instance down: cancels the idle sweep and every outstanding
    /// timer together so nothing mutates state after disposal.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        for (_, slot) in state.timers.drain() {
            slot.handle.abort();
        }
        state.pending.clear();
        if let Ok(mut sweep) = self.inner.sweep.lock() {
            if let Some(handle) = sweep.take() {
                handle.abort();
            }
        }
        tracing::debug!("stream aggregator shut down");
    }

    fn buffer_fragment(&self, state: &mut AggregatorState, fragment: TokenFragment) {
        let buffer = state.pending.entry(fragment.agent_type.clone()).or_default();
        buffer.text.push_str(&fragment.token);
        if fragment.message_id.is_some() {
            buffer.message_id = fragment.message_id;
        }
        self.install_timer(
            state,
            &fragment.agent_type,
            self.inner.config.debounce,
            TimerAction::PublishBuffer,
        );
    }

    fn finish_stream(&self, state: &mut AggregatorState, fragment: TokenFragment) {
        cancel_timer(state, &fragment.agent_type);
        let pending = state
            .pending
            .remove(&fragment.agent_type)
            .unwrap_or_default();
        let message_id = fragment.message_id.or(pending.message_id);
        let mut accumulated = pending.text;
        accumulated.push_str(&fragment.token);
        let cleaned = markers::clean_final_text(&fragment.agent_type, &accumulated);
        upsert_entry(
            state,
            &fragment.agent_type,
            cleaned,
            false,
            message_id.clone(),
        );
        if let Some(message_id) = message_id {
            state.completed.insert(message_id);
        }
        publish(&self.inner, state);
        self.install_timer(
            state,
            &fragment.agent_type,
            self.inner.config.finalize_grace,
            TimerAction::RemoveEntry,
        );
    }

    fn fail_stream(&self, state: &mut AggregatorState, fragment: TokenFragment) {
        cancel_timer(state, &fragment.agent_type);
        let pending = state.pending.remove(&fragment.agent_type);
        let message_id = fragment
            .message_id
            .or(pending.and_then(|buffer| buffer.message_id));
        tracing::warn!(agent = %fragment.agent_type, "agent reported terminal failure");
        // The notice text replaces whatever was buffered; no grace cleanup
        // is scheduled, the entry stays visible until reset or reclaimed.
        upsert_entry(state, &fragment.agent_type, fragment.token, false, message_id);
        publish(&self.inner, state);
    }

    /// Cancel-then-set the agent's timer inside the current critical
    /// section. The generation guard makes a superseded timer's fire a
    /// no-op, so two live timers for one agent are impossible.
    fn install_timer(
        &self,
        state: &mut AggregatorState,
        agent_type: &str,
        delay: Duration,
        action: TimerAction,
    ) {
        cancel_timer(state, agent_type);
        state.next_generation += 1;
        let generation = state.next_generation;
        let weak = Arc::downgrade(&self.inner);
        let agent = agent_type.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let inner = match weak.upgrade() {
                Some(inner) => inner,
                None => return,
            };
            let mut state = inner.state.lock().await;
            if state.closed {
                return;
            }
            let current = state.timers.get(&agent).map(|slot| slot.generation);
            if current != Some(generation) {
                return;
            }
            state.timers.remove(&agent);
            match action {
                TimerAction::PublishBuffer => {
                    let buffered = state
                        .pending
                        .get(&agent)
                        .map(|buffer| (buffer.text.clone(), buffer.message_id.clone()));
                    if let Some((tokens, message_id)) = buffered {
                        upsert_entry(&mut state, &agent, tokens, true, message_id);
                        publish(&inner, &state);
                    }
                }
                TimerAction::RemoveEntry => {
                    let inactive = state
                        .streams
                        .get(&agent)
                        .map(|entry| !entry.active)
                        .unwrap_or(false);
                    if inactive {
                        state.streams.remove(&agent);
                        publish(&inner, &state);
                    }
                }
            }
        });
        state.timers.insert(
            agent_type.to_string(),
            TimerSlot { generation, handle },
        );
    }
}

impl Default for StreamAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn cancel_timer(state: &mut AggregatorState, agent_type: &str) {
    if let Some(slot) = state.timers.remove(agent_type) {
        slot.handle.abort();
    }
}

/// Insert or refresh an agent's published entry, keeping `last_updated`
/// monotonically non-decreasing.
fn upsert_entry(
    state: &mut AggregatorState,
    agent_type: &str,
    tokens: String,
    active: bool,
    message_id: Option<String>,
) {
    let now = now_ms();
    let last_updated = state
        .streams
        .get(agent_type)
        .map(|entry| entry.last_updated.max(now))
        .unwrap_or(now);
    state.streams.insert(
        agent_type.to_string(),
        StreamEntry {
            tokens,
            active,
            last_updated,
            message_id,
        },
    );
}

fn publish(inner: &Inner, state: &AggregatorState) {
    inner.publisher.send_replace(state.streams.clone());
}

fn spawn_idle_sweep(
    weak: Weak<Inner>,
    sweep_interval: Duration,
    idle_threshold: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        // The first tick completes immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let inner = match weak.upgrade() {
                Some(inner) => inner,
                None => break,
            };
            let mut state = inner.state.lock().await;
            if state.closed {
                break;
            }
            let now = now_ms();
            let threshold = idle_threshold.as_millis() as i64;
            let mut changed = false;
            for (agent, entry) in state.streams.iter_mut() {
                if entry.active && now.saturating_sub(entry.last_updated) >= threshold {
                    entry.active = false;
                    changed = true;
                    tracing::debug!(agent = %agent, "marking stalled stream inactive");
                }
            }
            if changed {
                publish(&inner, &state);
            }
        }
    })
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
