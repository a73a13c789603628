use std::collections::HashSet;

use itertools::Itertools;
use rayon::prelude::*;

use crate::event_log::activity::{Activity, ActivityMatch, ActivityRegistry};
use crate::event_log::event_log_struct::EventLog;

///
/// Error encountered while accessing discovery results
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryError {
    /// A result accessor was invoked before [`RelationBuilder::evaluate`]
    NotYetEvaluated,
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::NotYetEvaluated => {
                write!(f, "Relation accessor called before evaluate()")
            }
        }
    }
}

impl std::error::Error for DiscoveryError {}

///
/// Builds the behavioral relations between the activities of an [`EventLog`]
///
/// [`RelationBuilder::evaluate`] scans the log once and derives, purely from the order of events
/// within traces:
///
/// * _causality_ (`a → b`): `a` directly precedes `b` somewhere, `b` never directly precedes `a`
/// * _parallelism_ (`a ‖ b`): `a` and `b` directly precede each other in different places
/// * _not-succession_ (`a # b`): neither directly precedes the other
/// * _alternative triples_ `(a, b, c)`: `a → b`, `a → c` and `b # c` (an exclusive split)
/// * _abstraction triples_ `(a, b, c)`: `a → c`, `b → c` and `a # b` (an exclusive join)
/// * _remaining causalities_: causal pairs not explained by any alternative/abstraction triple
///
/// The synthetic start/end activities of the passed registry bound every trace, so the first and
/// last real activities always have a causal predecessor/successor. All result accessors return
/// an error until `evaluate` has run.
///
#[derive(Debug, Clone, Default)]
pub struct RelationBuilder {
    causality: HashSet<(Activity, Activity)>,
    not_succession: HashSet<(Activity, Activity)>,
    parallel: HashSet<(Activity, Activity)>,

    alternatives: HashSet<(Activity, Activity, Activity)>,
    abstractions: HashSet<(Activity, Activity, Activity)>,
    remaining_causalities: HashSet<(Activity, Activity)>,

    activities: HashSet<Activity>,

    evaluated: bool,
}

impl RelationBuilder {
    /// Create a new, empty [`RelationBuilder`]
    pub fn new() -> Self {
        Self::default()
    }

    ///
    /// Evaluate the given log and fill the relation sets of this instance
    ///
    /// A log with zero traces yields only the synthetic start/end activities with no causal
    /// structure.
    ///
    pub fn evaluate(&mut self, log: &EventLog, registry: &ActivityRegistry) {
        self.clear();

        let start = registry.start_activity();
        let end = registry.end_activity();
        self.activities.insert(start);
        self.activities.insert(end);

        for trace in &log.traces {
            let (Some(first), Some(last)) = (trace.events.first(), trace.events.last()) else {
                continue;
            };
            self.activities
                .extend(trace.events.iter().map(|e| e.activity));
            self.causality.insert((start, first.activity));
            self.causality.insert((last.activity, end));
        }

        let direct_succession = direct_succession_of(log);
        self.fill_relations(&direct_succession);
        self.fill_triples();
        self.fill_remaining_causalities();

        self.evaluated = true;
    }

    /// All activities seen in the log, plus the synthetic start/end, sorted
    pub fn activities(&self) -> Result<Vec<Activity>, DiscoveryError> {
        self.assert_evaluated()?;
        Ok(self.activities.iter().copied().sorted().collect())
    }

    /// All pairs of activities with a causality between them, sorted
    pub fn causality(&self) -> Result<Vec<(Activity, Activity)>, DiscoveryError> {
        self.assert_evaluated()?;
        Ok(self.causality.iter().copied().sorted().collect())
    }

    /// All pairs of activities where neither ever directly precedes the other, sorted
    pub fn not_succession(&self) -> Result<Vec<(Activity, Activity)>, DiscoveryError> {
        self.assert_evaluated()?;
        Ok(self.not_succession.iter().copied().sorted().collect())
    }

    /// All pairs of activities which directly precede each other somewhere in the log, sorted
    pub fn parallel(&self) -> Result<Vec<(Activity, Activity)>, DiscoveryError> {
        self.assert_evaluated()?;
        Ok(self.parallel.iter().copied().sorted().collect())
    }

    /// All triples `(a, b, c)` where `b` and `c` are mutually exclusive successors of `a`, sorted
    pub fn alternatives(&self) -> Result<Vec<(Activity, Activity, Activity)>, DiscoveryError> {
        self.assert_evaluated()?;
        Ok(self.alternatives.iter().copied().sorted().collect())
    }

    /// All triples `(a, b, c)` where `a` and `b` are mutually exclusive predecessors of `c`, sorted
    pub fn abstractions(&self) -> Result<Vec<(Activity, Activity, Activity)>, DiscoveryError> {
        self.assert_evaluated()?;
        Ok(self.abstractions.iter().copied().sorted().collect())
    }

    /// Results from [`RelationBuilder::causality`] minus the pairs already contained in an
    /// alternative or abstraction triple, sorted
    pub fn remaining_causalities(&self) -> Result<Vec<(Activity, Activity)>, DiscoveryError> {
        self.assert_evaluated()?;
        Ok(self.remaining_causalities.iter().copied().sorted().collect())
    }

    fn clear(&mut self) {
        self.causality.clear();
        self.not_succession.clear();
        self.parallel.clear();
        self.alternatives.clear();
        self.abstractions.clear();
        self.remaining_causalities.clear();
        self.activities.clear();
        self.evaluated = false;
    }

    ///
    /// Classify every ordered activity pair as parallel, causal or not-succeeding
    ///
    /// Causalities seeded from the trace boundaries are preserved: a boundary pair is never
    /// direct-succeeding (the synthetic activities occur in no trace), so it only has to be kept
    /// out of the not-succession set here.
    ///
    fn fill_relations(&mut self, direct_succession: &HashSet<(Activity, Activity)>) {
        for &a in &self.activities {
            for &b in &self.activities {
                if direct_succession.contains(&(a, b)) {
                    if direct_succession.contains(&(b, a)) {
                        self.parallel.insert((a, b));
                    } else {
                        self.causality.insert((a, b));
                    }
                } else if !direct_succession.contains(&(b, a))
                    && !self.causality.contains(&(a, b))
                    && !self.causality.contains(&(b, a))
                {
                    self.not_succession.insert((a, b));
                }
            }
        }
    }

    ///
    /// Derive the alternative and abstraction triples from pairwise scans of the causal pairs
    /// sharing an activity
    ///
    /// The scanned pair lists are sorted so the emitted triples are canonical regardless of set
    /// iteration order.
    ///
    fn fill_triples(&mut self) {
        for &c in self.activities.iter().sorted() {
            // Alternatives: successors of c which are mutually exclusive
            let from_c: Vec<(Activity, Activity)> = self
                .causality
                .iter()
                .copied()
                .filter(|&(l, _)| l == c)
                .sorted()
                .collect();
            for (x, y) in from_c.iter().tuple_combinations() {
                if self.not_succession.contains(&(x.1, y.1)) && x.1 != y.1 {
                    self.alternatives.insert((c, x.1, y.1));
                }
            }

            // Abstractions: predecessors of c which are mutually exclusive
            let into_c: Vec<(Activity, Activity)> = self
                .causality
                .iter()
                .copied()
                .filter(|&(_, r)| r == c)
                .sorted()
                .collect();
            for (x, y) in into_c.iter().tuple_combinations() {
                if self.not_succession.contains(&(x.0, y.0)) && x.0 != y.0 {
                    self.abstractions.insert((x.0, y.0, c));
                }
            }
        }
    }

    fn fill_remaining_causalities(&mut self) {
        use ActivityMatch::{Any, Is};

        let remaining: Vec<(Activity, Activity)> = self
            .causality
            .iter()
            .copied()
            .filter(|&(l, r)| {
                !(find_triple(&self.alternatives, Is(l), Is(r), Any)
                    || find_triple(&self.alternatives, Is(l), Any, Is(r))
                    || find_triple(&self.abstractions, Any, Is(l), Is(r))
                    || find_triple(&self.abstractions, Is(l), Any, Is(r)))
            })
            .collect();
        self.remaining_causalities.extend(remaining);
    }

    fn assert_evaluated(&self) -> Result<(), DiscoveryError> {
        if self.evaluated {
            Ok(())
        } else {
            Err(DiscoveryError::NotYetEvaluated)
        }
    }
}

/// Whether a triple matching the given (possibly wildcarded) keys is contained in the set
fn find_triple(
    triples: &HashSet<(Activity, Activity, Activity)>,
    left: ActivityMatch,
    middle: ActivityMatch,
    right: ActivityMatch,
) -> bool {
    triples
        .iter()
        .any(|&(a, b, c)| left.matches(a) && middle.matches(b) && right.matches(c))
}

/// Collect the direct-succession pairs of the log: all `(a, b)` where `a` is immediately
/// followed by `b` in some trace
fn direct_succession_of(log: &EventLog) -> HashSet<(Activity, Activity)> {
    log.traces
        .par_iter()
        .map(|trace| {
            trace
                .events
                .windows(2)
                .map(|w| (w[0].activity, w[1].activity))
                .collect::<Vec<_>>()
        })
        .flatten()
        .fold(HashSet::new, |mut set, pair| {
            set.insert(pair);
            set
        })
        .reduce(HashSet::new, |mut acc, set| {
            if acc.len() < set.len() {
                return direct_succession_union(set, acc);
            }
            direct_succession_union(acc, set)
        })
}

fn direct_succession_union(
    mut larger: HashSet<(Activity, Activity)>,
    smaller: HashSet<(Activity, Activity)>,
) -> HashSet<(Activity, Activity)> {
    larger.extend(smaller);
    larger
}
