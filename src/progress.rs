// Copyright 2026 by the classplan contributors
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except in compliance with
// the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The progress callback contract.
//!
//! The core never writes to stdout, stderr or files; long operations emit
//! [`IterationEvent`]s through a caller-supplied callback and the caller
//! decides how to present them. The four levels are purely a *rate*
//! contract: minimal fires at start and end, normal on every 10% milestone,
//! detailed on every accepted iteration, debug on every proposal.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct IterationEvent {
    pub iteration: usize,
    pub total_estimate: usize,
    pub current_score: f64,
    pub best_score: f64,
    pub extras: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Minimal,
    Normal,
    Detailed,
    Debug,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Normal
    }
}

impl LogLevel {
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Minimal => "minimal",
            LogLevel::Normal => "normal",
            LogLevel::Detailed => "detailed",
            LogLevel::Debug => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<LogLevel, Error> {
        match s {
            "minimal" => Ok(LogLevel::Minimal),
            "normal" => Ok(LogLevel::Normal),
            "detailed" => Ok(LogLevel::Detailed),
            "debug" => Ok(LogLevel::Debug),
            _ => Err(Error::InvalidConfig {
                key: "log_level".to_string(),
                reason: format!("unknown level '{}'", s),
            }),
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(&IterationEvent) + Send + Sync>;

/// Rate-limits callback emission according to the configured level.
pub struct Reporter {
    level: LogLevel,
    callback: Option<ProgressCallback>,
    total_estimate: usize,
    next_milestone: usize,
}

impl Reporter {
    pub fn new(
        level: LogLevel,
        callback: Option<ProgressCallback>,
        total_estimate: usize,
    ) -> Reporter {
        Reporter {
            level,
            callback,
            total_estimate,
            next_milestone: milestone_step(total_estimate),
        }
    }

    /// A reporter that never emits; used where the caller passed no sink.
    pub fn disabled() -> Reporter {
        Reporter::new(LogLevel::Minimal, None, 0)
    }

    fn emit(&self, iteration: usize, current: f64, best: f64, extras: BTreeMap<String, f64>) {
        if let Some(callback) = &self.callback {
            callback(&IterationEvent {
                iteration,
                total_estimate: self.total_estimate,
                current_score: current,
                best_score: best,
                extras,
            });
        }
    }

    /// Fires at every level.
    pub fn start(&mut self, score: f64) {
        self.emit(0, score, score, BTreeMap::new());
    }

    /// Fires at every level.
    pub fn finish(&mut self, iteration: usize, current: f64, best: f64) {
        self.emit(iteration, current, best, BTreeMap::new());
    }

    /// An accepted (applied) operation. Fires at `Detailed` and up, and on
    /// 10% milestones at `Normal`.
    pub fn accepted(
        &mut self,
        iteration: usize,
        current: f64,
        best: f64,
        extras: BTreeMap<String, f64>,
    ) {
        match self.level {
            LogLevel::Detailed | LogLevel::Debug => {
                self.emit(iteration, current, best, extras)
            }
            LogLevel::Normal => {
                if iteration >= self.next_milestone && self.next_milestone > 0 {
                    while self.next_milestone <= iteration {
                        self.next_milestone += milestone_step(self.total_estimate);
                    }
                    self.emit(iteration, current, best, extras);
                }
            }
            LogLevel::Minimal => {}
        }
    }

    /// A raw proposal, before constraint filtering. Fires at `Debug` only.
    pub fn proposal(&mut self, iteration: usize, current: f64, best: f64) {
        if self.level == LogLevel::Debug {
            self.emit(iteration, current, best, BTreeMap::new());
        }
    }
}

fn milestone_step(total: usize) -> usize {
    (total / 10).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_reporter(level: LogLevel, total: usize) -> (Reporter, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let cloned = count.clone();
        let callback: ProgressCallback = Arc::new(move |_event| {
            cloned.fetch_add(1, Ordering::SeqCst);
        });
        (Reporter::new(level, Some(callback), total), count)
    }

    #[test]
    fn minimal_fires_start_and_end_only() {
        let (mut reporter, count) = counting_reporter(LogLevel::Minimal, 100);
        reporter.start(10.0);
        for i in 1..=100 {
            reporter.proposal(i, 10.0, 10.0);
            reporter.accepted(i, 10.0, 10.0, BTreeMap::new());
        }
        reporter.finish(100, 12.0, 12.0);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn normal_fires_on_milestones() {
        let (mut reporter, count) = counting_reporter(LogLevel::Normal, 100);
        reporter.start(10.0);
        for i in 1..=100 {
            reporter.accepted(i, 10.0, 10.0, BTreeMap::new());
        }
        reporter.finish(100, 12.0, 12.0);
        // start + 10 milestones + end
        assert_eq!(count.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn detailed_fires_every_accepted_iteration() {
        let (mut reporter, count) = counting_reporter(LogLevel::Detailed, 100);
        for i in 1..=30 {
            reporter.proposal(i, 10.0, 10.0);
            reporter.accepted(i, 10.0, 10.0, BTreeMap::new());
        }
        assert_eq!(count.load(Ordering::SeqCst), 30);
    }

    #[test]
    fn debug_also_fires_proposals() {
        let (mut reporter, count) = counting_reporter(LogLevel::Debug, 100);
        for i in 1..=30 {
            reporter.proposal(i, 10.0, 10.0);
        }
        assert_eq!(count.load(Ordering::SeqCst), 30);
    }
}
