use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::activity::Activity;

///
/// A single event, as occurred in an event trace
///
/// Events are immutable once parsed; the activity is an interned handle into the
/// [`ActivityRegistry`](super::activity::ActivityRegistry) the log was imported with.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Executed activity
    pub activity: Activity,
    /// Resource that executed the activity (empty if the log does not record one)
    pub resource: String,
    /// Completion timestamp
    pub timestamp: DateTime<Utc>,
}

///
/// An event trace: one case execution as a consecutive list of events
///
/// The order of events is semantically meaningful; it defines direct succession.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Events of the trace, in execution order
    pub events: Vec<Event>,
}

///
/// An event log: an ordered list of [`Trace`]s
///
/// Read-only input to relation discovery.
///
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    /// Traces of the log
    pub traces: Vec<Trace>,
}

impl EventLog {
    /// Total number of events across all traces
    pub fn event_count(&self) -> usize {
        self.traces.iter().map(|t| t.events.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use crate::event_log::activity::ActivityRegistry;
    use crate::utils::test_utils::log_from_strings;

    #[test]
    fn log_from_compact_strings() {
        let mut registry = ActivityRegistry::new();
        let log = log_from_strings(&mut registry, &["abd", "acd"]);

        assert_eq!(log.traces.len(), 2);
        assert_eq!(log.event_count(), 6);
        // "a" and "d" are shared between the traces
        assert_eq!(
            log.traces[0].events[0].activity,
            log.traces[1].events[0].activity
        );
        assert_eq!(registry.len(), 6);
    }
}
