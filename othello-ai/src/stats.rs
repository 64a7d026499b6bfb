//! Search statistics tracking.

use std::fmt;
use std::time::{Duration, Instant};

/// Statistics collected during one search.
#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    /// Interior and leaf nodes visited
    pub nodes: u64,

    /// Static evaluations at the depth horizon
    pub leaf_evals: u64,

    /// Positions where neither side could move
    pub terminal_positions: u64,

    /// Forced passes explored inside the tree
    pub passes: u64,

    /// Branches cut off by alpha-beta
    pub beta_cutoffs: u64,

    /// Transposition table probes that produced an ordering move
    pub tt_hits: u64,

    /// Deepest iteration that finished inside the budget
    pub completed_depth: u8,

    /// Whether the node or time budget ran out before the target depth
    pub budget_exhausted: bool,

    /// Whether the completed depth reached the end of the game
    pub exact: bool,

    /// Wall-clock time spent
    pub elapsed: Duration,

    start_time: Option<Instant>,
}

impl SearchStats {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Stop the clock.
    pub fn finish(&mut self) {
        if let Some(start) = self.start_time {
            self.elapsed = start.elapsed();
        }
    }

    /// Time since the search started.
    pub fn running_time(&self) -> Duration {
        self.start_time.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Nodes per second over the whole search.
    pub fn nodes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.nodes as f64 / secs
        } else {
            0.0
        }
    }

    /// Share of visited nodes that produced a cutoff.
    pub fn cutoff_rate(&self) -> f64 {
        if self.nodes > 0 {
            100.0 * self.beta_cutoffs as f64 / self.nodes as f64
        } else {
            0.0
        }
    }
}

impl fmt::Display for SearchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "depth={}{} nodes={} leaves={} terminals={} cutoffs={:.1}% tt_hits={} rate={:.0}/s time={:.3}s",
            self.completed_depth,
            if self.exact { " (exact)" } else { "" },
            self.nodes,
            self.leaf_evals,
            self.terminal_positions,
            self.cutoff_rate(),
            self.tt_hits,
            self.nodes_per_sec(),
            self.elapsed.as_secs_f64(),
        )?;
        if self.budget_exhausted {
            f.write_str(" [budget]")?;
        }
        Ok(())
    }
}
