//! Filtered, synchronous event subscriptions.
//!
//! Delivery is in-process and immediate: no queueing, no replay, no
//! persistence. A subscriber that was not registered when an event fired
//! never sees it. Conversation-scoped subscribers are invoked before
//! wildcard subscribers; within each group, registration order holds.
//!
//! Callbacks run outside the table lock with per-callback panic
//! isolation, so one broken subscriber cannot take down delivery to the
//! rest.

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tracing::{error, trace};

use colloquy_core::events::ConversationEvent;
use colloquy_core::ids;

/// Synchronous event callback.
pub type EventCallback = Arc<dyn Fn(&ConversationEvent) + Send + Sync>;

/// What a subscription listens to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Events of a single conversation.
    Conversation(String),
    /// Events of every conversation.
    All,
}

/// Optional event-type and agent filters.
///
/// `None` means "no constraint". The agent filter uses the canonical
/// attribution rule in [`ConversationEvent::agent_id`]; events without
/// an owning agent always pass an agent filter.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    events: Option<HashSet<String>>,
    agents: Option<HashSet<String>>,
}

impl EventFilter {
    /// Restrict to the given event types.
    #[must_use]
    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = Some(events.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to events attributed to the given agents.
    #[must_use]
    pub fn with_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agents = Some(agents.into_iter().map(Into::into).collect());
        self
    }

    /// Whether the event passes both filters.
    #[must_use]
    pub fn accepts(&self, event: &ConversationEvent) -> bool {
        if let Some(events) = &self.events {
            if !events.contains(event.event_type()) {
                return false;
            }
        }
        if let Some(agents) = &self.agents {
            if let Some(agent_id) = event.agent_id() {
                if !agents.contains(agent_id) {
                    return false;
                }
            }
        }
        true
    }
}

struct SubscriptionRecord {
    id: String,
    filter: EventFilter,
    callback: EventCallback,
}

/// Registry of live subscriptions.
#[derive(Default)]
pub struct SubscriberTable {
    by_conversation: HashMap<String, Vec<SubscriptionRecord>>,
    wildcard: Vec<SubscriptionRecord>,
}

impl SubscriberTable {
    fn insert(&mut self, scope: &Scope, filter: EventFilter, callback: EventCallback) -> String {
        let id = ids::subscription_id();
        let record = SubscriptionRecord {
            id: id.clone(),
            filter,
            callback,
        };
        match scope {
            Scope::Conversation(conversation_id) => {
                self.by_conversation
                    .entry(conversation_id.clone())
                    .or_default()
                    .push(record);
            }
            Scope::All => self.wildcard.push(record),
        }
        id
    }

    fn remove(&mut self, scope: &Scope, subscription_id: &str) -> bool {
        let records = match scope {
            Scope::Conversation(conversation_id) => {
                let Some(records) = self.by_conversation.get_mut(conversation_id) else {
                    return false;
                };
                records
            }
            Scope::All => &mut self.wildcard,
        };

        let before = records.len();
        records.retain(|record| record.id != subscription_id);
        let removed = records.len() < before;

        if removed {
            if let Scope::Conversation(conversation_id) = scope {
                if self
                    .by_conversation
                    .get(conversation_id)
                    .is_some_and(Vec::is_empty)
                {
                    let _ = self.by_conversation.remove(conversation_id);
                }
            }
        }
        removed
    }

    /// Callbacks accepting this event: conversation-scoped first, then
    /// wildcard, registration order within each group.
    fn matching(&self, event: &ConversationEvent) -> Vec<EventCallback> {
        let mut callbacks = Vec::new();
        if let Some(records) = self.by_conversation.get(event.conversation_id()) {
            callbacks.extend(
                records
                    .iter()
                    .filter(|r| r.filter.accepts(event))
                    .map(|r| Arc::clone(&r.callback)),
            );
        }
        callbacks.extend(
            self.wildcard
                .iter()
                .filter(|r| r.filter.accepts(event))
                .map(|r| Arc::clone(&r.callback)),
        );
        callbacks
    }

    fn len(&self) -> usize {
        self.by_conversation.values().map(Vec::len).sum::<usize>() + self.wildcard.len()
    }
}

/// Owning handle over the subscriber table.
#[derive(Default)]
pub struct Subscriptions {
    table: Arc<Mutex<SubscriberTable>>,
}

impl Subscriptions {
    /// Register a callback. The returned handle unsubscribes on drop.
    pub fn subscribe(
        &self,
        scope: Scope,
        filter: EventFilter,
        callback: EventCallback,
    ) -> SubscriptionHandle {
        let id = {
            let mut table = self.table.lock();
            let id = table.insert(&scope, filter, callback);
            gauge!("colloquy_subscriptions_active").set(table.len() as f64);
            id
        };
        SubscriptionHandle {
            scope,
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Deliver an event to every matching subscriber, synchronously, in
    /// order. A panicking callback is isolated and logged; delivery to
    /// the remaining subscribers continues.
    pub fn deliver(&self, event: &ConversationEvent) {
        // Snapshot under the lock, invoke outside it: a callback may
        // itself subscribe or unsubscribe.
        let callbacks = self.table.lock().matching(event);
        trace!(
            event_type = event.event_type(),
            conversation_id = event.conversation_id(),
            subscribers = callbacks.len(),
            "delivering event"
        );
        for callback in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".into());
                error!(
                    event_type = event.event_type(),
                    conversation_id = event.conversation_id(),
                    panic = %message,
                    "subscriber panicked during delivery"
                );
            }
        }
        counter!("colloquy_events_emitted_total", "type" => event.event_type()).increment(1);
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        let mut table = self.table.lock();
        table.by_conversation.clear();
        table.wildcard.clear();
        gauge!("colloquy_subscriptions_active").set(0.0);
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether no subscriptions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capability to cancel one subscription. Unsubscribes on drop;
/// [`SubscriptionHandle::unsubscribe`] is the explicit, idempotent form.
pub struct SubscriptionHandle {
    scope: Scope,
    id: String,
    table: Weak<Mutex<SubscriberTable>>,
}

impl SubscriptionHandle {
    /// Remove the subscription. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if let Some(table) = self.table.upgrade() {
            let mut table = table.lock();
            let _ = table.remove(&self.scope, &self.id);
            gauge!("colloquy_subscriptions_active").set(table.len() as f64);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::events::BaseEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ready(conversation_id: &str) -> ConversationEvent {
        ConversationEvent::ConversationReady {
            base: BaseEvent::now(conversation_id),
        }
    }

    fn thinking(conversation_id: &str, agent_id: &str) -> ConversationEvent {
        ConversationEvent::AgentThinking {
            base: BaseEvent::now(conversation_id),
            agent_id: agent_id.into(),
            thought: "hm".into(),
        }
    }

    fn counting_callback(counter: &Arc<AtomicUsize>) -> EventCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn conversation_scope_only_sees_its_conversation() {
        let subs = Subscriptions::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let _handle = subs.subscribe(
            Scope::Conversation("conv_1".into()),
            EventFilter::default(),
            counting_callback(&seen),
        );

        subs.deliver(&ready("conv_1"));
        subs.deliver(&ready("conv_2"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wildcard_sees_every_conversation() {
        let subs = Subscriptions::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let _handle = subs.subscribe(Scope::All, EventFilter::default(), counting_callback(&seen));

        subs.deliver(&ready("conv_1"));
        subs.deliver(&ready("conv_2"));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn event_filter_drops_other_types() {
        let subs = Subscriptions::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let _handle = subs.subscribe(
            Scope::All,
            EventFilter::default().with_events(["agent_thinking"]),
            counting_callback(&seen),
        );

        subs.deliver(&ready("conv_1"));
        subs.deliver(&thinking("conv_1", "agent-a"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn agent_filter_passes_agentless_events() {
        let filter = EventFilter::default().with_agents(["agent-a"]);
        assert!(filter.accepts(&thinking("conv_1", "agent-a")));
        assert!(!filter.accepts(&thinking("conv_1", "agent-b")));
        // Lifecycle events have no owning agent and always pass.
        assert!(filter.accepts(&ready("conv_1")));
    }

    #[test]
    fn delivery_order_is_scoped_then_wildcard_registration_order() {
        let subs = Subscriptions::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        let push = |tag: &'static str| -> EventCallback {
            let order = Arc::clone(&order);
            Arc::new(move |_| order.lock().push(tag))
        };

        let _w = subs.subscribe(Scope::All, EventFilter::default(), push("wildcard"));
        let _a = subs.subscribe(
            Scope::Conversation("conv_1".into()),
            EventFilter::default(),
            push("scoped-1"),
        );
        let _b = subs.subscribe(
            Scope::Conversation("conv_1".into()),
            EventFilter::default(),
            push("scoped-2"),
        );

        subs.deliver(&ready("conv_1"));
        assert_eq!(*order.lock(), vec!["scoped-1", "scoped-2", "wildcard"]);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_delivery() {
        let subs = Subscriptions::default();
        let seen = Arc::new(AtomicUsize::new(0));

        let _bad = subs.subscribe(
            Scope::All,
            EventFilter::default(),
            Arc::new(|_| panic!("subscriber bug")),
        );
        let _good = subs.subscribe(Scope::All, EventFilter::default(), counting_callback(&seen));

        subs.deliver(&ready("conv_1"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_frees_the_slot() {
        let subs = Subscriptions::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let handle = subs.subscribe(Scope::All, EventFilter::default(), counting_callback(&seen));
        assert_eq!(subs.len(), 1);

        handle.unsubscribe();
        handle.unsubscribe();
        assert!(subs.is_empty());

        subs.deliver(&ready("conv_1"));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropping_the_handle_unsubscribes() {
        let subs = Subscriptions::default();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let _handle =
                subs.subscribe(Scope::All, EventFilter::default(), counting_callback(&seen));
            subs.deliver(&ready("conv_1"));
        }
        subs.deliver(&ready("conv_1"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_replay_for_late_subscribers() {
        let subs = Subscriptions::default();
        subs.deliver(&ready("conv_1"));

        let seen = Arc::new(AtomicUsize::new(0));
        let _handle = subs.subscribe(Scope::All, EventFilter::default(), counting_callback(&seen));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
