//! Container lifecycle events.

use std::fmt;

/// Kind of a container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Destroy,
    Die,
    HealthStatus,
    Pause,
    Start,
    Stop,
    Unpause,
    Update,
    /// Any event the supervisor does not name explicitly.
    Other(String),
}

/// Events that affect the health of a supervised container.
pub const SUPERVISED_EVENTS: [EventKind; 8] = [
    EventKind::Destroy,
    EventKind::Die,
    EventKind::HealthStatus,
    EventKind::Pause,
    EventKind::Start,
    EventKind::Stop,
    EventKind::Unpause,
    EventKind::Update,
];

impl EventKind {
    /// Parse the status reported by the event feed.
    ///
    /// Health events carry their result after a colon
    /// (`health_status: healthy`); only the kind is kept.
    pub fn parse(status: &str) -> Self {
        let kind = status.split(':').next().unwrap_or_default().trim();
        match kind {
            "create" => EventKind::Create,
            "destroy" => EventKind::Destroy,
            "die" => EventKind::Die,
            "health_status" => EventKind::HealthStatus,
            "pause" => EventKind::Pause,
            "start" => EventKind::Start,
            "stop" => EventKind::Stop,
            "unpause" => EventKind::Unpause,
            "update" => EventKind::Update,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Create => "create",
            EventKind::Destroy => "destroy",
            EventKind::Die => "die",
            EventKind::HealthStatus => "health_status",
            EventKind::Pause => "pause",
            EventKind::Start => "start",
            EventKind::Stop => "stop",
            EventKind::Unpause => "unpause",
            EventKind::Update => "update",
            EventKind::Other(kind) => kind,
        }
    }

    /// Whether this event ends supervision of the container.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Destroy)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lifecycle event for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub unit_id: String,
    pub kind: EventKind,
}

impl EventRecord {
    pub fn new(unit_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            unit_id: unit_id.into(),
            kind,
        }
    }
}

/// Selects which events an event subscription delivers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Restrict to one container.
    pub unit_id: Option<String>,
    /// Event kinds to deliver; empty means all.
    pub kinds: Vec<EventKind>,
}

impl EventFilter {
    /// Events relevant to supervising a single container.
    pub fn for_unit(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: Some(unit_id.into()),
            kinds: SUPERVISED_EVENTS.to_vec(),
        }
    }

    /// Whether `record` passes this filter.
    pub fn matches(&self, record: &EventRecord) -> bool {
        if self
            .unit_id
            .as_ref()
            .is_some_and(|id| *id != record.unit_id)
        {
            return false;
        }
        self.kinds.is_empty() || self.kinds.contains(&record.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_kinds() {
        for kind in SUPERVISED_EVENTS {
            assert_eq!(EventKind::parse(kind.as_str()), kind);
        }
        assert_eq!(EventKind::parse("create"), EventKind::Create);
    }

    #[test]
    fn test_parse_health_status_with_result() {
        assert_eq!(
            EventKind::parse("health_status: unhealthy"),
            EventKind::HealthStatus
        );
    }

    #[test]
    fn test_parse_unknown_kind() {
        assert_eq!(
            EventKind::parse("exec_start: sh"),
            EventKind::Other("exec_start".to_string())
        );
    }

    #[test]
    fn test_only_destroy_is_terminal() {
        assert!(EventKind::Destroy.is_terminal());
        assert!(!EventKind::Die.is_terminal());
        assert!(!EventKind::Stop.is_terminal());
    }

    #[test]
    fn test_unit_filter() {
        let filter = EventFilter::for_unit("abc");
        assert!(filter.matches(&EventRecord::new("abc", EventKind::Start)));
        assert!(!filter.matches(&EventRecord::new("def", EventKind::Start)));
        assert!(!filter.matches(&EventRecord::new("abc", EventKind::Create)));
    }
}
