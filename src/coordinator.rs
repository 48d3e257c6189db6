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

//! Composition of algorithm runs into one user-visible result.
//!
//! All strategies operate on a single shared starting snapshot so their
//! results are comparable. Parallel fan-out gives every run its own deep
//! copy, seed and rng; worker threads share nothing mutable. The reported
//! best breaks score ties by (algorithm name, seed) in ascending order so
//! the outcome is reproducible regardless of thread scheduling.

use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use ordered_float::NotNan;

use crate::algorithms::{Algorithm, CancelToken, RunContext, RunResult};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::School;
use crate::progress::{LogLevel, ProgressCallback};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Single,
    Parallel,
    Sequential,
    BestOf,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Single => "single",
            Strategy::Parallel => "parallel",
            Strategy::Sequential => "sequential",
            Strategy::BestOf => "best_of",
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Strategy> {
        match s {
            "single" => Ok(Strategy::Single),
            "parallel" => Ok(Strategy::Parallel),
            "sequential" => Ok(Strategy::Sequential),
            "best_of" => Ok(Strategy::BestOf),
            _ => Err(Error::InvalidConfig {
                key: "strategy".to_string(),
                reason: format!("unknown strategy '{}'", s),
            }),
        }
    }
}

pub struct CoordinatorOptions {
    pub strategy: Strategy,
    pub algorithms: Vec<Algorithm>,
    pub base_seed: u64,
    /// Per-run seeds; every run uses `base_seed` when absent.
    pub seeds: Option<Vec<u64>>,
    /// Total wall-clock budget over all runs; exhaustion cancels the rest.
    pub total_budget: Option<Duration>,
    pub level: LogLevel,
    pub callback: Option<ProgressCallback>,
    pub cancel: CancelToken,
}

impl CoordinatorOptions {
    pub fn new(strategy: Strategy, algorithms: Vec<Algorithm>) -> CoordinatorOptions {
        CoordinatorOptions {
            strategy,
            algorithms,
            base_seed: 0,
            seeds: None,
            total_budget: None,
            level: LogLevel::Minimal,
            callback: None,
            cancel: CancelToken::new(),
        }
    }

    fn seed_for(&self, position: usize) -> u64 {
        match &self.seeds {
            Some(seeds) => seeds.get(position).copied().unwrap_or(self.base_seed),
            None => self.base_seed,
        }
    }
}

/// All runs the coordinator produced, plus failures that did not stop the
/// surviving runs.
#[derive(Debug)]
pub struct CoordinatorOutcome {
    pub strategy: Strategy,
    pub runs: Vec<RunResult>,
    pub failures: Vec<Error>,
    best: Option<usize>,
}

impl CoordinatorOutcome {
    pub fn best_run(&self) -> Option<&RunResult> {
        self.best.map(|i| &self.runs[i])
    }
}

/// Execute a strategy over one starting snapshot.
pub fn execute(
    school: &School,
    config: &Config,
    options: &CoordinatorOptions,
) -> Result<CoordinatorOutcome> {
    if options.algorithms.is_empty() {
        return Err(Error::InvalidConfig {
            key: "algorithms".to_string(),
            reason: "at least one algorithm is required".to_string(),
        });
    }
    let deadline = options.total_budget.map(|budget| Instant::now() + budget);

    let runs = match options.strategy {
        Strategy::Single => {
            let algorithm = options.algorithms[0];
            if options.algorithms.len() > 1 {
                warn!(
                    "strategy 'single' runs only the first algorithm ({})",
                    algorithm.name()
                );
            }
            vec![run_one(school, config, options, algorithm, 0, deadline)]
        }
        Strategy::Parallel | Strategy::BestOf => {
            run_parallel(school, config, options, deadline)
        }
        Strategy::Sequential => run_sequential(school, config, options, deadline)?,
    };

    let mut outcome = CoordinatorOutcome {
        strategy: options.strategy,
        runs: Vec::new(),
        failures: Vec::new(),
        best: None,
    };
    for run in runs {
        match run {
            Ok(result) => outcome.runs.push(result),
            Err(e) => outcome.failures.push(e),
        }
    }
    outcome.best = pick_best(&outcome.runs);

    if let Some(best) = outcome.best_run() {
        info!(
            "strategy {} finished: best {} (seed {}) scored {:.4}",
            options.strategy.name(),
            best.algorithm,
            best.seed,
            best.best_score
        );
    } else {
        warn!(
            "strategy {} produced no successful run ({} failures)",
            options.strategy.name(),
            outcome.failures.len()
        );
    }
    Ok(outcome)
}

/// Highest score wins; ties go to the ascending (algorithm name, seed).
fn pick_best(runs: &[RunResult]) -> Option<usize> {
    runs.iter()
        .enumerate()
        .min_by_key(|(_, run)| {
            (
                std::cmp::Reverse(NotNan::new(run.best_score).expect("no NaN scores")),
                run.algorithm.clone(),
                run.seed,
            )
        })
        .map(|(i, _)| i)
}

fn run_one(
    school: &School,
    config: &Config,
    options: &CoordinatorOptions,
    algorithm: Algorithm,
    position: usize,
    deadline: Option<Instant>,
) -> Result<RunResult> {
    let ctx = RunContext {
        config,
        cancel: options.cancel.clone(),
        deadline,
        level: options.level,
        callback: options.callback.clone(),
    };
    algorithm.run(school, options.seed_for(position), &ctx)
}

/// Fan the algorithms out over worker threads, at most one batch of
/// `num_cpus` at a time. Every worker owns a deep copy of the snapshot and
/// its own rng.
fn run_parallel(
    school: &School,
    config: &Config,
    options: &CoordinatorOptions,
    deadline: Option<Instant>,
) -> Vec<Result<RunResult>> {
    let batch = num_cpus::get().max(1);
    let mut results = Vec::with_capacity(options.algorithms.len());

    for (chunk_index, chunk) in options.algorithms.chunks(batch).enumerate() {
        let mut workers = Vec::new();
        for (offset, algorithm) in chunk.iter().enumerate() {
            let position = chunk_index * batch + offset;
            let algorithm = *algorithm;
            let school = school.clone();
            let config = config.clone();
            let cancel = options.cancel.clone();
            let callback = options.callback.clone();
            let level = options.level;
            let seed = options.seed_for(position);
            let worker = thread::Builder::new()
                .name(format!("opt worker {}", position))
                .spawn(move || {
                    let ctx = RunContext {
                        config: &config,
                        cancel,
                        deadline,
                        level,
                        callback,
                    };
                    algorithm.run(&school, seed, &ctx)
                })
                .expect("failed to spawn optimization worker");
            workers.push(worker);
        }
        for worker in workers {
            results.push(worker.join().expect("optimization worker panicked"));
        }
    }
    results
}

/// Chain the algorithms: each stage starts from the previous best snapshot.
/// Random swap is only admissible as the first stage.
fn run_sequential(
    school: &School,
    config: &Config,
    options: &CoordinatorOptions,
    deadline: Option<Instant>,
) -> Result<Vec<Result<RunResult>>> {
    for (position, algorithm) in options.algorithms.iter().enumerate() {
        if position > 0 && *algorithm == Algorithm::RandomSwap {
            return Err(Error::InvalidConfig {
                key: "algorithms".to_string(),
                reason: "random_swap is only admissible as the first stage of a chain"
                    .to_string(),
            });
        }
    }

    let mut results: Vec<Result<RunResult>> = Vec::with_capacity(options.algorithms.len());
    let mut current = school.clone();
    for (position, algorithm) in options.algorithms.iter().enumerate() {
        if options.cancel.is_cancelled() {
            debug!("sequential chain cancelled before stage {}", position);
            break;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                debug!("sequential chain out of budget before stage {}", position);
                break;
            }
        }
        let result = run_one(&current, config, options, *algorithm, position, deadline);
        if let Ok(run) = &result {
            current = run.best_snapshot.clone();
        }
        results.push(result);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Gender;
    use crate::test::{school_round_robin, student};

    fn school() -> School {
        let mut students = Vec::new();
        for pair in 0..4u32 {
            let a_id = 750000001 + pair * 2;
            let b_id = a_id + 1;
            let mut a = student(a_id, Gender::M);
            a.preferred_friends = vec![b_id];
            let mut b = student(b_id, Gender::F);
            b.preferred_friends = vec![a_id];
            students.push(a);
            students.push(b);
        }
        school_round_robin(students, 2)
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.constraints.minimum_friends = 0;
        config.optimization.max_iterations = 200;
        config.optimization.algorithms.generations = 8;
        config.optimization.algorithms.population_size = 6;
        config.optimization.algorithms.stagnation_limit = 8;
        config
    }

    #[test]
    fn best_of_is_reproducible_across_schedules() {
        let school = school();
        let config = config();
        let options = CoordinatorOptions::new(
            Strategy::BestOf,
            vec![
                Algorithm::RandomSwap,
                Algorithm::LocalSearch,
                Algorithm::SimulatedAnnealing,
            ],
        );
        let a = execute(&school, &config, &options).unwrap();
        let b = execute(&school, &config, &options).unwrap();
        let (a, b) = (a.best_run().unwrap(), b.best_run().unwrap());
        assert_eq!(a.algorithm, b.algorithm);
        assert_eq!(a.best_score, b.best_score);
        assert_eq!(a.best_snapshot, b.best_snapshot);
    }

    #[test]
    fn sequential_chains_snapshots() {
        let school = school();
        let config = config();
        let options = CoordinatorOptions::new(
            Strategy::Sequential,
            vec![Algorithm::RandomSwap, Algorithm::LocalSearch],
        );
        let outcome = execute(&school, &config, &options).unwrap();
        assert_eq!(outcome.runs.len(), 2);
        // each stage starts where the previous one ended
        assert_eq!(outcome.runs[1].initial_score, outcome.runs[0].best_score);
        // the chain never loses ground
        let final_best = outcome.best_run().unwrap().best_score;
        for run in &outcome.runs {
            assert!(final_best >= run.initial_score);
        }
    }

    #[test]
    fn random_swap_is_rejected_mid_chain() {
        let school = school();
        let config = config();
        let options = CoordinatorOptions::new(
            Strategy::Sequential,
            vec![Algorithm::LocalSearch, Algorithm::RandomSwap],
        );
        assert!(matches!(
            execute(&school, &config, &options),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn exhausted_budget_cancels_runs() {
        let school = school();
        let mut config = config();
        config.optimization.max_iterations = 1_000_000;
        config.optimization.early_stop_threshold = 1_000_000;
        let mut options =
            CoordinatorOptions::new(Strategy::Single, vec![Algorithm::RandomSwap]);
        options.total_budget = Some(Duration::from_millis(0));
        let outcome = execute(&school, &config, &options).unwrap();
        let run = outcome.best_run().unwrap();
        assert!(run.timed_out);
        // the best-so-far snapshot is still returned
        assert!(run.best_score >= run.initial_score);
    }

    #[test]
    fn parallel_ties_break_by_algorithm_name() {
        let school = school();
        let mut config = config();
        // zero iterations: every algorithm returns the initial snapshot
        config.optimization.max_iterations = 0;
        config.optimization.algorithms.generations = 0;
        config.optimization.algorithms.max_passes = 0;
        let options = CoordinatorOptions::new(
            Strategy::Parallel,
            vec![
                Algorithm::RandomSwap,
                Algorithm::SimulatedAnnealing,
                Algorithm::LocalSearch,
                Algorithm::Evolutionary,
            ],
        );
        let outcome = execute(&school, &config, &options).unwrap();
        assert_eq!(outcome.runs.len(), 4);
        assert_eq!(outcome.best_run().unwrap().algorithm, "evolutionary");
    }
}
