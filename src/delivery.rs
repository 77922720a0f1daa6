//! Delivery Coordinator
//!
//! Reconciles cached steps with live subscribers. Each session has a feed
//! holding its subscribers, the chunks published so far and its terminal state.
//! `join` (replay + registration) and `publish` (forward) both run under the
//! feed lock, so every subscriber sees step ids strictly increasing with no gap
//! and no duplicate regardless of when it joined.

pub mod channel;
pub mod events;

pub use channel::{ChannelHandle, ChannelId};
pub use events::{ClientCommand, DeliveryEvent};

use crate::cache::ActionCache;
use crate::error::PipelineError;
use crate::lecture::ActionChunk;
use crate::types::{SessionId, StepId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum TerminalState {
    Completed { total_steps: usize },
    Failed { error: String },
}

impl TerminalState {
    fn event(&self, session_id: &str) -> DeliveryEvent {
        match self {
            TerminalState::Completed { total_steps } => DeliveryEvent::Completed {
                session_id: session_id.to_string(),
                total_steps: *total_steps,
            },
            TerminalState::Failed { error } => DeliveryEvent::Failed {
                session_id: session_id.to_string(),
                error: error.clone(),
            },
        }
    }
}

struct Subscriber {
    channel: ChannelHandle,
    /// Highest step id delivered; 0 before the first
    last_delivered: StepId,
    terminal_sent: bool,
}

#[derive(Default)]
struct SessionFeed {
    subscribers: Vec<Subscriber>,
    /// Published chunks, used when the cache misses during replay or gap fill
    history: BTreeMap<StepId, ActionChunk>,
    terminal: Option<TerminalState>,
}

impl SessionFeed {
    fn lookup(&self, cache: &ActionCache, session_id: &str, step_id: StepId) -> Option<ActionChunk> {
        cache
            .peek_chunk(session_id, step_id)
            .or_else(|| self.history.get(&step_id).cloned())
    }
}

pub struct DeliveryCoordinator {
    cache: Arc<ActionCache>,
    feeds: RwLock<HashMap<SessionId, Arc<Mutex<SessionFeed>>>>,
}

impl DeliveryCoordinator {
    pub fn new(cache: Arc<ActionCache>) -> Self {
        Self {
            cache,
            feeds: RwLock::new(HashMap::new()),
        }
    }

    fn feed(&self, session_id: &str) -> Arc<Mutex<SessionFeed>> {
        if let Some(feed) = self.feeds.read().get(session_id) {
            return feed.clone();
        }
        self.feeds
            .write()
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    fn existing_feed(&self, session_id: &str) -> Option<Arc<Mutex<SessionFeed>>> {
        self.feeds.read().get(session_id).cloned()
    }

    /// Replay every available step in order, then attach `channel` for live events.
    ///
    /// Returns the number of replayed steps. Replay stops at the first step that
    /// is neither cached nor recorded. A terminal event, if the session already
    /// finished, follows the replay. Joining again on a subscribed channel only
    /// sends what that channel has not seen.
    pub fn join(&self, session_id: &str, channel: ChannelHandle) -> Result<usize, PipelineError> {
        let feed = self.feed(session_id);
        let mut feed = feed.lock();

        let channel_error = |reason: String| PipelineError::DeliveryChannelError {
            session_id: session_id.to_string(),
            channel_id: channel.id(),
            reason,
        };

        // A repeated join on the same channel resumes where that channel left off.
        let existing = feed
            .subscribers
            .iter()
            .position(|s| s.channel.id() == channel.id());
        let (start, already_terminal) = existing
            .map(|index| {
                let subscriber = &feed.subscribers[index];
                (subscriber.last_delivered, subscriber.terminal_sent)
            })
            .unwrap_or((0, false));

        let mut last_delivered = start;
        while let Some(chunk) = feed.lookup(&self.cache, session_id, last_delivered + 1) {
            channel
                .send(DeliveryEvent::rendered(&chunk))
                .map_err(channel_error)?;
            last_delivered += 1;
        }

        let mut terminal_sent = already_terminal;
        if let (Some(terminal), false) = (&feed.terminal, terminal_sent) {
            channel
                .send(terminal.event(session_id))
                .map_err(channel_error)?;
            terminal_sent = true;
        }

        let replayed = (last_delivered - start) as usize;
        debug!(
            session_id,
            channel_id = channel.id(),
            replayed,
            rejoin = existing.is_some(),
            "Channel joined"
        );
        let subscriber = Subscriber {
            channel,
            last_delivered,
            terminal_sent,
        };
        match existing {
            Some(index) => feed.subscribers[index] = subscriber,
            None => feed.subscribers.push(subscriber),
        }
        Ok(replayed)
    }

    /// Forward `chunk` to every subscriber that has not seen it yet.
    pub fn publish(&self, session_id: &str, chunk: &ActionChunk) {
        let feed = self.feed(session_id);
        let mut feed = feed.lock();
        feed.history.insert(chunk.step_id, chunk.clone());

        let SessionFeed {
            subscribers,
            history,
            ..
        } = &mut *feed;
        subscribers.retain_mut(|subscriber| {
            if chunk.step_id <= subscriber.last_delivered {
                return true;
            }
            for step_id in subscriber.last_delivered + 1..=chunk.step_id {
                let next = if step_id == chunk.step_id {
                    Some(chunk.clone())
                } else {
                    self.cache
                        .peek_chunk(session_id, step_id)
                        .or_else(|| history.get(&step_id).cloned())
                };
                let Some(next) = next else {
                    // Cannot deliver past a hole; a later publish of the missing step resumes.
                    debug!(session_id, step_id, "Gap before published step, holding back");
                    return true;
                };
                if let Err(reason) = subscriber.channel.send(DeliveryEvent::rendered(&next)) {
                    drop_channel(session_id, &subscriber.channel, reason);
                    return false;
                }
                subscriber.last_delivered = step_id;
            }
            true
        });
    }

    /// Remove one channel from a session. Generation is unaffected.
    pub fn leave(&self, session_id: &str, channel_id: ChannelId) -> bool {
        let Some(feed) = self.existing_feed(session_id) else {
            return false;
        };
        let mut feed = feed.lock();
        let before = feed.subscribers.len();
        feed.subscribers.retain(|s| s.channel.id() != channel_id);
        let removed = feed.subscribers.len() != before;
        if removed {
            debug!(session_id, channel_id, "Channel left");
        }
        removed
    }

    pub fn complete(&self, session_id: &str, total_steps: usize) {
        self.finish(session_id, TerminalState::Completed { total_steps });
    }

    pub fn fail(&self, session_id: &str, error: &str) {
        self.finish(
            session_id,
            TerminalState::Failed {
                error: error.to_string(),
            },
        );
    }

    fn finish(&self, session_id: &str, terminal: TerminalState) {
        let feed = self.feed(session_id);
        let mut feed = feed.lock();
        let event = terminal.event(session_id);
        feed.terminal = Some(terminal);
        feed.subscribers.retain_mut(|subscriber| {
            if subscriber.terminal_sent {
                return true;
            }
            match subscriber.channel.send(event.clone()) {
                Ok(()) => {
                    subscriber.terminal_sent = true;
                    true
                }
                Err(reason) => {
                    drop_channel(session_id, &subscriber.channel, reason);
                    false
                }
            }
        });
    }

    /// Prepare a session for a (re-)run: clears any previous terminal state.
    pub fn open_session(&self, session_id: &str) {
        let feed = self.feed(session_id);
        let mut feed = feed.lock();
        feed.terminal = None;
        for subscriber in feed.subscribers.iter_mut() {
            subscriber.terminal_sent = false;
        }
    }

    /// Drop all delivery state for a session; its channels are released.
    pub fn forget_session(&self, session_id: &str) -> bool {
        self.feeds.write().remove(session_id).is_some()
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.feeds.read().contains_key(session_id)
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.existing_feed(session_id)
            .map(|feed| feed.lock().subscribers.len())
            .unwrap_or(0)
    }
}

fn drop_channel(session_id: &str, channel: &ChannelHandle, reason: String) {
    let err = PipelineError::DeliveryChannelError {
        session_id: session_id.to_string(),
        channel_id: channel.id(),
        reason,
    };
    warn!(session_id, channel_id = channel.id(), error = %err, "Dropping delivery channel");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::UnavailableBackend;
    use crate::cache::CacheSettings;
    use crate::lecture::Action;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn chunk(step_id: StepId) -> ActionChunk {
        ActionChunk::primary("s1", step_id, vec![Action::new("drawLabel")])
    }

    fn drain(rx: &mut UnboundedReceiver<DeliveryEvent>) -> Vec<DeliveryEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn steps(events: &[DeliveryEvent]) -> Vec<StepId> {
        events.iter().filter_map(DeliveryEvent::step_id).collect()
    }

    #[test]
    fn late_join_replays_then_goes_live() {
        let cache = Arc::new(ActionCache::in_memory());
        let coordinator = DeliveryCoordinator::new(cache.clone());
        for id in 1..=3 {
            cache.put_chunk(&chunk(id));
            coordinator.publish("s1", &chunk(id));
        }

        let (handle, mut rx) = ChannelHandle::pair();
        assert_eq!(coordinator.join("s1", handle).unwrap(), 3);
        for id in 4..=5 {
            cache.put_chunk(&chunk(id));
            coordinator.publish("s1", &chunk(id));
        }
        coordinator.complete("s1", 5);

        let events = drain(&mut rx);
        assert_eq!(steps(&events), vec![1, 2, 3, 4, 5]);
        assert_eq!(
            events.last(),
            Some(&DeliveryEvent::Completed {
                session_id: "s1".to_string(),
                total_steps: 5
            })
        );
    }

    #[test]
    fn repeated_join_on_one_channel_does_not_replay_again() {
        let cache = Arc::new(ActionCache::in_memory());
        let coordinator = DeliveryCoordinator::new(cache.clone());
        for id in 1..=2 {
            cache.put_chunk(&chunk(id));
            coordinator.publish("s1", &chunk(id));
        }

        let (handle, mut rx) = ChannelHandle::pair();
        assert_eq!(coordinator.join("s1", handle.clone()).unwrap(), 2);
        assert_eq!(coordinator.join("s1", handle.clone()).unwrap(), 0);
        assert_eq!(coordinator.subscriber_count("s1"), 1);

        cache.put_chunk(&chunk(3));
        coordinator.publish("s1", &chunk(3));
        coordinator.complete("s1", 3);
        assert_eq!(coordinator.join("s1", handle).unwrap(), 0);

        let events = drain(&mut rx);
        assert_eq!(steps(&events), vec![1, 2, 3]);
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
    }

    #[test]
    fn cached_but_unpublished_steps_are_not_duplicated() {
        let cache = Arc::new(ActionCache::in_memory());
        let coordinator = DeliveryCoordinator::new(cache.clone());
        // Steps 1 and 2 cached, only 1 published so far.
        cache.put_chunk(&chunk(1));
        cache.put_chunk(&chunk(2));
        coordinator.publish("s1", &chunk(1));

        let (handle, mut rx) = ChannelHandle::pair();
        coordinator.join("s1", handle).unwrap();
        coordinator.publish("s1", &chunk(2));
        coordinator.publish("s1", &chunk(3));
        assert_eq!(steps(&drain(&mut rx)), vec![1, 2, 3]);
    }

    #[test]
    fn replay_falls_back_to_history_during_cache_outage() {
        let cache = Arc::new(ActionCache::new(
            Arc::new(UnavailableBackend),
            CacheSettings::default(),
        ));
        let coordinator = DeliveryCoordinator::new(cache);
        coordinator.publish("s1", &chunk(1));
        coordinator.publish("s1", &chunk(2));

        let (handle, mut rx) = ChannelHandle::pair();
        assert_eq!(coordinator.join("s1", handle).unwrap(), 2);
        assert_eq!(steps(&drain(&mut rx)), vec![1, 2]);
    }

    #[test]
    fn replay_stops_at_first_missing_step() {
        let cache = Arc::new(ActionCache::in_memory());
        cache.put_chunk(&chunk(1));
        cache.put_chunk(&chunk(3));
        let coordinator = DeliveryCoordinator::new(cache.clone());

        let (handle, mut rx) = ChannelHandle::pair();
        assert_eq!(coordinator.join("s1", handle).unwrap(), 1);
        assert_eq!(steps(&drain(&mut rx)), vec![1]);
        coordinator.publish("s1", &chunk(2));
        assert_eq!(steps(&drain(&mut rx)), vec![2]);
        coordinator.publish("s1", &chunk(3));
        assert_eq!(steps(&drain(&mut rx)), vec![3]);
    }

    #[test]
    fn failed_channel_is_dropped_without_affecting_others() {
        let coordinator = DeliveryCoordinator::new(Arc::new(ActionCache::in_memory()));
        let (gone, gone_rx) = ChannelHandle::pair();
        let (alive, mut alive_rx) = ChannelHandle::pair();
        coordinator.join("s1", gone).unwrap();
        coordinator.join("s1", alive).unwrap();
        drop(gone_rx);

        coordinator.publish("s1", &chunk(1));
        assert_eq!(coordinator.subscriber_count("s1"), 1);
        assert_eq!(steps(&drain(&mut alive_rx)), vec![1]);
    }

    #[test]
    fn leave_stops_delivery() {
        let coordinator = DeliveryCoordinator::new(Arc::new(ActionCache::in_memory()));
        let (handle, mut rx) = ChannelHandle::pair();
        let channel_id = handle.id();
        coordinator.join("s1", handle).unwrap();
        assert!(coordinator.leave("s1", channel_id));
        assert!(!coordinator.leave("s1", channel_id));
        coordinator.publish("s1", &chunk(1));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn failure_reaches_late_joiners() {
        let coordinator = DeliveryCoordinator::new(Arc::new(ActionCache::in_memory()));
        coordinator.fail("s1", "plan generation failed");
        let (handle, mut rx) = ChannelHandle::pair();
        coordinator.join("s1", handle).unwrap();
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], DeliveryEvent::Failed { .. }));

        // A re-run clears the terminal state; completion is delivered once.
        coordinator.open_session("s1");
        coordinator.complete("s1", 0);
        coordinator.complete("s1", 0);
        assert_eq!(drain(&mut rx).len(), 1);
    }
}
