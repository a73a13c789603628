use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Name of the synthetic start activity injected before the first event of every trace
pub const START_ACTIVITY: &str = "__START";
/// Name of the synthetic end activity injected after the last event of every trace
pub const END_ACTIVITY: &str = "__END";

///
/// An interned activity, like `"check ticket"`
///
/// Activities are plain indices into an [`ActivityRegistry`]. Two activities obtained from the
/// same registry are equal if and only if their names are equal, so they can be compared, hashed
/// and copied without touching the name strings.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Activity(usize);

impl Activity {
    /// Index of this activity in the registry it was interned in
    pub fn index(self) -> usize {
        self.0
    }
}

///
/// Wildcard-capable key for looking up [`Activity`]s in relation sets
///
/// [`ActivityMatch::Any`] matches every activity, making matching intentionally non-transitive:
/// `Any` matches both `a` and `b` without implying `a == b`. For this reason an `ActivityMatch`
/// is only ever used transiently as a lookup key and must never be stored in a persistent
/// collection.
///
#[derive(Debug, Clone, Copy)]
pub enum ActivityMatch {
    /// Matches exactly the given activity
    Is(Activity),
    /// Matches every activity
    Any,
}

impl ActivityMatch {
    /// Check whether the given activity matches this key
    pub fn matches(self, activity: Activity) -> bool {
        match self {
            ActivityMatch::Is(a) => a == activity,
            ActivityMatch::Any => true,
        }
    }
}

///
/// Process-wide intern table for [`Activity`] names
///
/// Guarantees that no two activities with the same name exist at a time. The registry is an
/// explicit value passed by reference into every component that creates or resolves activities;
/// the synthetic [`START_ACTIVITY`] and [`END_ACTIVITY`] are interned on construction.
///
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRegistry {
    names: Vec<String>,
    index_of: HashMap<String, usize>,
}

impl Default for ActivityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityRegistry {
    /// Create a new registry containing only the synthetic start/end activities
    pub fn new() -> Self {
        let mut registry = ActivityRegistry {
            names: Vec::new(),
            index_of: HashMap::new(),
        };
        registry.intern(START_ACTIVITY);
        registry.intern(END_ACTIVITY);
        registry
    }

    /// Return the activity with the given name, interning it first if it is not registered yet
    pub fn intern(&mut self, name: &str) -> Activity {
        if let Some(index) = self.index_of.get(name) {
            Activity(*index)
        } else {
            let index = self.names.len();
            self.names.push(name.to_string());
            self.index_of.insert(name.to_string(), index);
            Activity(index)
        }
    }

    /// Look up an already-interned activity by name
    pub fn lookup(&self, name: &str) -> Option<Activity> {
        self.index_of.get(name).map(|index| Activity(*index))
    }

    /// Name of the given activity
    ///
    /// Panics if the activity was interned in a different registry.
    pub fn name_of(&self, activity: Activity) -> &str {
        &self.names[activity.0]
    }

    /// The synthetic start activity
    pub fn start_activity(&self) -> Activity {
        Activity(0)
    }

    /// The synthetic end activity
    pub fn end_activity(&self) -> Activity {
        Activity(1)
    }

    /// Whether the activity is one of the synthetic start/end boundary activities
    pub fn is_synthetic(&self, activity: Activity) -> bool {
        activity.0 <= 1
    }

    /// Number of interned activities (including the two synthetic ones)
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the registry is empty (never true: start/end are always interned)
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_yields_identical_activities() {
        let mut registry = ActivityRegistry::new();
        let a1 = registry.intern("register request");
        let b = registry.intern("check ticket");
        let a2 = registry.intern("register request");

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert_eq!(registry.name_of(a1), "register request");
        assert_eq!(registry.lookup("check ticket"), Some(b));
        assert_eq!(registry.lookup("unseen"), None);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn synthetic_activities_are_preinterned() {
        let registry = ActivityRegistry::new();
        assert_eq!(registry.lookup(START_ACTIVITY), Some(registry.start_activity()));
        assert_eq!(registry.lookup(END_ACTIVITY), Some(registry.end_activity()));
        assert!(registry.is_synthetic(registry.start_activity()));
        assert!(registry.is_synthetic(registry.end_activity()));
    }

    #[test]
    fn wildcard_matches_any_activity_without_transitivity() {
        let mut registry = ActivityRegistry::new();
        let a = registry.intern("a");
        let b = registry.intern("b");

        assert!(ActivityMatch::Any.matches(a));
        assert!(ActivityMatch::Any.matches(b));
        assert!(ActivityMatch::Is(a).matches(a));
        assert!(!ActivityMatch::Is(a).matches(b));
        // Any matching both a and b does not make a and b equal
        assert_ne!(a, b);
    }
}
