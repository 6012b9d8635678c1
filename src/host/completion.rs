//! Configurable task completion criteria.
//!
//! ```toml
//! completion = { or = [ { timeout = 8.0 }, { and = [ { eval = 0.01 }, { speed = 0.001 } ] } ] }
//! ```

use serde::Deserialize;

use super::solver::TaskStatus;

/// Completion criterion evaluated once per control tick.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionCriteria {
    /// Time since the criterion was armed exceeds the value (seconds)
    Timeout(f64),
    /// Full task error norm below the value
    Eval(f64),
    /// Full task speed norm below the value
    Speed(f64),
    And(Vec<CompletionCriteria>),
    Or(Vec<CompletionCriteria>),
}

impl Default for CompletionCriteria {
    fn default() -> Self {
        CompletionCriteria::And(vec![
            CompletionCriteria::Eval(0.01),
            CompletionCriteria::Speed(1e-3),
        ])
    }
}

impl CompletionCriteria {
    fn holds(&self, elapsed: f64, status: &TaskStatus) -> bool {
        match self {
            CompletionCriteria::Timeout(t) => elapsed >= *t,
            CompletionCriteria::Eval(th) => status.eval.norm() < *th,
            CompletionCriteria::Speed(th) => status.speed.norm() < *th,
            CompletionCriteria::And(all) => all.iter().all(|c| c.holds(elapsed, status)),
            CompletionCriteria::Or(any) => any.iter().any(|c| c.holds(elapsed, status)),
        }
    }

    /// Human-readable description for logs
    pub fn describe(&self) -> String {
        match self {
            CompletionCriteria::Timeout(t) => format!("timeout {:.2}s", t),
            CompletionCriteria::Eval(th) => format!("eval < {}", th),
            CompletionCriteria::Speed(th) => format!("speed < {}", th),
            CompletionCriteria::And(all) => join(all, " AND "),
            CompletionCriteria::Or(any) => join(any, " OR "),
        }
    }
}

fn join(items: &[CompletionCriteria], sep: &str) -> String {
    let parts: Vec<String> = items.iter().map(|c| c.describe()).collect();
    format!("({})", parts.join(sep))
}

/// Armed criterion tracking elapsed time.
#[derive(Clone, Debug)]
pub struct CompletionTracker {
    criteria: CompletionCriteria,
    dt: f64,
    elapsed: f64,
}

impl CompletionTracker {
    pub fn new(criteria: CompletionCriteria, dt: f64) -> Self {
        Self {
            criteria,
            dt,
            elapsed: 0.0,
        }
    }

    /// Advance by one tick and evaluate against the task status.
    pub fn completed(&mut self, status: &TaskStatus) -> bool {
        self.elapsed += self.dt;
        self.criteria.holds(self.elapsed, status)
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn criteria(&self) -> &CompletionCriteria {
        &self.criteria
    }
}
