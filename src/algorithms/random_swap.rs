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

//! The reference baseline: pure random swap hill climbing.
//!
//! Draw two distinct classes, swap one unlocked student from each, keep the
//! result only when it beats the best snapshot so far. Simple, fast and the
//! yardstick every other algorithm is compared against.

use std::collections::BTreeMap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::constraints::Checker;
use crate::error::Result;
use crate::model::School;
use crate::scoring;

use super::{propose_swap, Interrupt, RunContext, RunResult};

pub(crate) fn run(school: &School, seed: u64, ctx: &RunContext) -> Result<RunResult> {
    let tic = Instant::now();
    let config = ctx.config;
    let checker = Checker::new(config);
    let mut rng = StdRng::seed_from_u64(seed);

    let max_iterations = config.optimization.max_iterations;
    let mut reporter = ctx.reporter(max_iterations);

    let mut best = school.clone();
    let mut best_score = scoring::final_score(&best, config);
    let initial_score = best_score;
    reporter.start(initial_score);

    let mut iterations = 0usize;
    let mut non_improving = 0usize;
    let mut rejected_streak = 0usize;
    let mut early_stopped = false;
    let mut stuck = false;
    let mut cancelled = false;
    let mut timed_out = false;

    while iterations < max_iterations {
        match ctx.interrupted() {
            Some(Interrupt::Cancelled) => {
                cancelled = true;
                break;
            }
            Some(Interrupt::TimedOut) => {
                timed_out = true;
                break;
            }
            None => {}
        }
        reporter.proposal(iterations, best_score, best_score);

        let candidate = match propose_swap(&best, &checker, &mut rng) {
            Some(candidate) => candidate,
            None => {
                // A failed attempt, not an iteration
                rejected_streak += 1;
                if rejected_streak >= config.optimization.max_swap_attempts {
                    stuck = true;
                    early_stopped = true;
                    break;
                }
                continue;
            }
        };
        rejected_streak = 0;
        iterations += 1;

        let candidate_score = scoring::final_score(&candidate, config);
        let improved = candidate_score > best_score;
        let neutral =
            candidate_score == best_score && config.optimization.accept_neutral_moves;
        if improved || neutral {
            best = candidate;
            best_score = candidate_score;
        }
        if improved {
            non_improving = 0;
        } else {
            non_improving += 1;
            if non_improving >= config.optimization.early_stop_threshold {
                early_stopped = true;
                break;
            }
        }
        reporter.accepted(iterations, candidate_score, best_score, BTreeMap::new());
    }

    reporter.finish(iterations, best_score, best_score);
    Ok(RunResult {
        algorithm: "random_swap".to_string(),
        seed,
        initial_score,
        best_score,
        constraint_violations_at_end: checker.validate(&best).len(),
        best_snapshot: best,
        iterations_used: iterations,
        early_stopped,
        cancelled,
        timed_out,
        stuck,
        elapsed: tic.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use crate::algorithms::{Algorithm, RunContext};
    use crate::config::Config;
    use crate::model::Gender;
    use crate::test::{school_round_robin, student};

    fn social_school() -> crate::model::School {
        // Four mutual friend pairs, dealt so every pair is split
        let mut students = Vec::new();
        for pair in 0..4u32 {
            let a_id = 700000001 + pair * 2;
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
        config.optimization.max_iterations = 300;
        config.optimization.early_stop_threshold = 300;
        config
    }

    #[test]
    fn improves_a_splittable_start() {
        let school = social_school();
        let config = config();
        let ctx = RunContext::new(&config);
        let result = Algorithm::RandomSwap.run(&school, 42, &ctx).unwrap();
        assert!(result.best_score > result.initial_score);
        assert_eq!(result.constraint_violations_at_end, 0);
        assert_eq!(school, social_school(), "input must stay untouched");
    }

    #[test]
    fn is_reproducible_per_seed() {
        let school = social_school();
        let config = config();
        let ctx = RunContext::new(&config);
        let a = Algorithm::RandomSwap.run(&school, 9, &ctx).unwrap();
        let b = Algorithm::RandomSwap.run(&school, 9, &ctx).unwrap();
        assert_eq!(a.best_score, b.best_score);
        assert_eq!(a.best_snapshot, b.best_snapshot);
        assert_eq!(a.iterations_used, b.iterations_used);
    }

    #[test]
    fn zero_iterations_returns_the_start() {
        let school = social_school();
        let mut config = config();
        config.optimization.max_iterations = 0;
        let ctx = RunContext::new(&config);
        let result = Algorithm::RandomSwap.run(&school, 1, &ctx).unwrap();
        assert_eq!(result.initial_score, result.best_score);
        assert_eq!(result.best_snapshot, school);
        assert_eq!(result.iterations_used, 0);
    }

    #[test]
    fn never_worse_than_initial() {
        let school = social_school();
        let config = config();
        let ctx = RunContext::new(&config);
        for seed in 0..5 {
            let result = Algorithm::RandomSwap.run(&school, seed, &ctx).unwrap();
            assert!(result.best_score >= result.initial_score);
        }
    }
}
