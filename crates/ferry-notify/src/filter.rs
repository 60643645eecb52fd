//! Subscription filters

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use ferry_core::{EventKind, NotificationEvent, SessionId};

type Predicate = Arc<dyn Fn(&NotificationEvent) -> bool + Send + Sync>;

/// Which events a subscriber wants.
///
/// Kind and session constraints are ANDed; an empty filter matches
/// everything.
#[derive(Clone, Default)]
pub struct EventFilter {
    kinds: Option<HashSet<EventKind>>,
    session: Option<SessionId>,
    predicate: Option<Predicate>,
}

impl EventFilter {
    /// Match every event
    pub fn all() -> Self {
        Self::default()
    }

    /// Add an accepted kind
    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kinds.get_or_insert_with(HashSet::new).insert(kind);
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds.get_or_insert_with(HashSet::new).extend(kinds);
        self
    }

    /// Only events about this session
    pub fn session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    /// Arbitrary extra predicate
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&NotificationEvent) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn matches(&self, event: &NotificationEvent) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(session) = self.session {
            if event.session != Some(session) {
                return false;
            }
        }
        match &self.predicate {
            Some(predicate) => predicate(event),
            None => true,
        }
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilter")
            .field("kinds", &self.kinds)
            .field("session", &self.session)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
