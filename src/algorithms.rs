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

//! The shared contract of the optimization algorithms.
//!
//! Every algorithm takes a starting snapshot, a seed and a [`RunContext`]
//! and returns a [`RunResult`]. Algorithms never mutate their input
//! snapshot, never score an invalid snapshot and poll the cancellation
//! token at least once per iteration. Given the same snapshot, seed and
//! configuration, a run is fully reproducible.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::Config;
use crate::constraints::Checker;
use crate::error::{Error, Result};
use crate::model::School;
use crate::ops;
use crate::progress::{LogLevel, ProgressCallback, Reporter};

pub mod annealing;
pub mod evolutionary;
pub mod local_search;
pub mod random_swap;

/// Cooperative cancellation flag shared between the caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Why a run ended before exhausting its iteration budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Everything an algorithm needs besides the snapshot and the seed.
pub struct RunContext<'a> {
    pub config: &'a Config,
    pub cancel: CancelToken,
    /// Wall-clock cutoff; exceeding it is a form of cancellation.
    pub deadline: Option<Instant>,
    pub level: LogLevel,
    pub callback: Option<ProgressCallback>,
}

impl<'a> RunContext<'a> {
    pub fn new(config: &'a Config) -> RunContext<'a> {
        RunContext {
            config,
            cancel: CancelToken::new(),
            deadline: None,
            level: LogLevel::Minimal,
            callback: None,
        }
    }

    /// Poll the cancellation token and the deadline.
    pub fn interrupted(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Some(Interrupt::TimedOut);
            }
        }
        None
    }

    pub fn reporter(&self, total_estimate: usize) -> Reporter {
        Reporter::new(self.level, self.callback.clone(), total_estimate)
    }
}

/// Outcome of one algorithm run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub algorithm: String,
    pub seed: u64,
    pub initial_score: f64,
    pub best_score: f64,
    pub best_snapshot: School,
    /// Accepted (applied) operations; failed proposals do not count
    pub iterations_used: usize,
    pub early_stopped: bool,
    pub cancelled: bool,
    pub timed_out: bool,
    /// The proposal space was exhausted without an acceptable move
    pub stuck: bool,
    pub elapsed: Duration,
    pub constraint_violations_at_end: usize,
}

impl RunResult {
    pub fn improvement(&self) -> f64 {
        self.best_score - self.initial_score
    }
}

/// The algorithm family, dispatched as a tagged variant so new members can
/// be added without touching the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Algorithm {
    RandomSwap,
    LocalSearch,
    SimulatedAnnealing,
    Evolutionary,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::RandomSwap => "random_swap",
            Algorithm::LocalSearch => "local_search",
            Algorithm::SimulatedAnnealing => "simulated_annealing",
            Algorithm::Evolutionary => "evolutionary",
        }
    }

    pub const ALL: [Algorithm; 4] = [
        Algorithm::RandomSwap,
        Algorithm::LocalSearch,
        Algorithm::SimulatedAnnealing,
        Algorithm::Evolutionary,
    ];

    /// Run this algorithm on a snapshot. The input snapshot is left
    /// untouched; the result carries the best snapshot found.
    pub fn run(&self, school: &School, seed: u64, ctx: &RunContext) -> Result<RunResult> {
        let checker = Checker::new(ctx.config);
        if !checker.validate(school).is_empty() {
            return Err(Error::RunFailed {
                algorithm: self.name().to_string(),
                reason: "starting snapshot violates hard constraints".to_string(),
            });
        }
        match self {
            Algorithm::RandomSwap => random_swap::run(school, seed, ctx),
            Algorithm::LocalSearch => local_search::run(school, seed, ctx),
            Algorithm::SimulatedAnnealing => annealing::run(school, seed, ctx),
            Algorithm::Evolutionary => evolutionary::run(school, seed, ctx),
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Algorithm> {
        match s {
            "random_swap" => Ok(Algorithm::RandomSwap),
            "local_search" => Ok(Algorithm::LocalSearch),
            "simulated_annealing" | "annealing" => Ok(Algorithm::SimulatedAnnealing),
            "evolutionary" | "genetic" => Ok(Algorithm::Evolutionary),
            _ => Err(Error::InvalidConfig {
                key: "algorithm".to_string(),
                reason: format!("unknown algorithm '{}'", s),
            }),
        }
    }
}

/// Members of class `c` that neither a force class nor a force group pins.
pub(crate) fn unlocked_members(school: &School, c: usize) -> Vec<usize> {
    school
        .members(c)
        .iter()
        .copied()
        .filter(|m| !school.roster().is_locked(*m))
        .collect()
}

/// Propose one random swap between two distinct classes. Returns the new
/// snapshot, or `None` when the drawn proposal is rejected.
pub(crate) fn propose_swap(
    school: &School,
    checker: &Checker,
    rng: &mut StdRng,
) -> Option<School> {
    let k = school.num_classes();
    if k < 2 {
        return None;
    }
    let c1 = rng.gen_range(0..k);
    let c2 = {
        let offset = rng.gen_range(1..k);
        (c1 + offset) % k
    };
    let from_c1 = unlocked_members(school, c1);
    let from_c2 = unlocked_members(school, c2);
    if from_c1.is_empty() || from_c2.is_empty() {
        return None;
    }
    let a = from_c1[rng.gen_range(0..from_c1.len())];
    let b = from_c2[rng.gen_range(0..from_c2.len())];
    ops::swap_students(school, checker, a, b).ok()
}

/// Propose one random single-student move. Returns the new snapshot, or
/// `None` when the drawn proposal is rejected.
pub(crate) fn propose_move(
    school: &School,
    checker: &Checker,
    rng: &mut StdRng,
) -> Option<School> {
    let k = school.num_classes();
    if k < 2 {
        return None;
    }
    let c1 = rng.gen_range(0..k);
    let candidates = unlocked_members(school, c1);
    if candidates.is_empty() {
        return None;
    }
    let i = candidates[rng.gen_range(0..candidates.len())];
    let target = {
        let offset = rng.gen_range(1..k);
        (c1 + offset) % k
    };
    ops::move_student(school, checker, i, target).ok()
}
