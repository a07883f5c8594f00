//! Download notifications and their subscribers

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::resource::ResourceItem;

/// Notification emitted by an installation pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    /// Fraction of the archive downloaded so far, between 0.0 and 1.0.
    /// Only sent when the server announced the archive size.
    Progress { item: ResourceItem, fraction: f64 },
    /// The item is installed
    Success { item: ResourceItem },
    /// The pipeline failed or was cancelled
    Failure { item: ResourceItem },
}

impl ResourceEvent {
    pub fn item(&self) -> &ResourceItem {
        match self {
            Self::Progress { item, .. } | Self::Success { item } | Self::Failure { item } => item,
        }
    }
}

/// Opaque handle returned by `subscribe`, used to unsubscribe again
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionToken(u64);

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription#{}", self.0)
    }
}

pub type EventHandler = Arc<dyn Fn(&ResourceEvent) + Send + Sync>;

/// Table of event handlers keyed by subscription token
#[derive(Default)]
pub struct Subscribers {
    next_token: u64,
    handlers: BTreeMap<SubscriptionToken, EventHandler>,
}

impl Subscribers {
    pub fn add(&mut self, handler: EventHandler) -> SubscriptionToken {
        self.next_token += 1;
        let token = SubscriptionToken(self.next_token);
        self.handlers.insert(token, handler);
        token
    }

    pub fn remove(&mut self, token: SubscriptionToken) -> bool {
        self.handlers.remove(&token).is_some()
    }

    /// Handlers to call for one event. Dispatch happens on the copy, outside any lock.
    pub fn snapshot(&self) -> Vec<EventHandler> {
        self.handlers.values().cloned().collect()
    }
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("tokens", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
