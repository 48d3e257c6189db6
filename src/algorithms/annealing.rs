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

//! Simulated annealing with an exponential cooling schedule and optional
//! reheating.
//!
//! Each step proposes one random legal swap or single move. Improvements
//! are always taken; deteriorations are taken with probability exp(Δ/T).
//! The best snapshot ever seen is tracked independently of the wandering
//! current snapshot, so the returned result never regresses below the
//! starting score.

use std::collections::BTreeMap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constraints::Checker;
use crate::error::Result;
use crate::model::School;
use crate::scoring;

use super::{propose_move, propose_swap, Interrupt, RunContext, RunResult};

pub(crate) fn run(school: &School, seed: u64, ctx: &RunContext) -> Result<RunResult> {
    let tic = Instant::now();
    let config = ctx.config;
    let checker = Checker::new(config);
    let knobs = &config.optimization.algorithms;
    let mut rng = StdRng::seed_from_u64(seed);

    let max_steps = config.optimization.max_iterations;
    let mut reporter = ctx.reporter(max_steps);

    let mut current = school.clone();
    let mut current_score = scoring::final_score(&current, config);
    let initial_score = current_score;
    let mut best = current.clone();
    let mut best_score = current_score;
    reporter.start(initial_score);

    let initial_temperature = knobs.initial_temperature;
    let mut temperature = initial_temperature;
    let mut steps = 0usize;
    let mut accepted = 0usize;
    let mut since_improvement = 0usize;
    let mut rejected_streak = 0usize;
    let mut early_stopped = false;
    let mut stuck = false;
    let mut cancelled = false;
    let mut timed_out = false;

    while steps < max_steps {
        if temperature < knobs.min_temperature {
            early_stopped = true;
            break;
        }
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
        reporter.proposal(steps, current_score, best_score);

        let candidate = if rng.gen_bool(0.5) {
            propose_swap(&current, &checker, &mut rng)
        } else {
            propose_move(&current, &checker, &mut rng)
        };
        let candidate = match candidate {
            Some(candidate) => candidate,
            None => {
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
        steps += 1;

        let candidate_score = scoring::final_score(&candidate, config);
        let delta = candidate_score - current_score;
        let accept = delta >= 0.0 || rng.gen::<f64>() < (delta / temperature).exp();
        if accept {
            current = candidate;
            current_score = candidate_score;
            accepted += 1;
            if current_score > best_score {
                best = current.clone();
                best_score = current_score;
                since_improvement = 0;
            } else {
                since_improvement += 1;
            }
            let mut extras = BTreeMap::new();
            extras.insert("temperature".to_string(), temperature);
            reporter.accepted(accepted, current_score, best_score, extras);
        } else {
            since_improvement += 1;
        }

        temperature *= knobs.cooling_rate;
        if let Some(threshold) = knobs.reheat_threshold {
            if since_improvement >= threshold && temperature < initial_temperature / 10.0 {
                temperature = initial_temperature / 2.0;
                since_improvement = 0;
            }
        }
    }

    reporter.finish(accepted, current_score, best_score);
    Ok(RunResult {
        algorithm: "simulated_annealing".to_string(),
        seed,
        initial_score,
        best_score,
        constraint_violations_at_end: checker.validate(&best).len(),
        best_snapshot: best,
        iterations_used: accepted,
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

    fn config() -> Config {
        let mut config = Config::default();
        config.constraints.minimum_friends = 0;
        config.optimization.max_iterations = 400;
        config.optimization.algorithms.initial_temperature = 10.0;
        config.optimization.algorithms.cooling_rate = 0.99;
        config
    }

    fn school() -> crate::model::School {
        let mut students = Vec::new();
        for pair in 0..3u32 {
            let a_id = 730000001 + pair * 2;
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

    #[test]
    fn best_never_regresses_even_when_current_wanders() {
        let school = school();
        let config = config();
        let ctx = RunContext::new(&config);
        let result = Algorithm::SimulatedAnnealing.run(&school, 17, &ctx).unwrap();
        assert!(result.best_score >= result.initial_score);
        assert_eq!(result.constraint_violations_at_end, 0);
    }

    #[test]
    fn runs_are_reproducible() {
        let school = school();
        let config = config();
        let ctx = RunContext::new(&config);
        let a = Algorithm::SimulatedAnnealing.run(&school, 4, &ctx).unwrap();
        let b = Algorithm::SimulatedAnnealing.run(&school, 4, &ctx).unwrap();
        assert_eq!(a.best_score, b.best_score);
        assert_eq!(a.best_snapshot, b.best_snapshot);
        assert_eq!(a.iterations_used, b.iterations_used);
    }

    #[test]
    fn cooling_floor_stops_the_run() {
        let school = school();
        let mut config = config();
        config.optimization.max_iterations = 1_000_000;
        config.optimization.algorithms.initial_temperature = 0.01;
        config.optimization.algorithms.cooling_rate = 0.5;
        config.optimization.algorithms.min_temperature = 0.005;
        let ctx = RunContext::new(&config);
        let result = Algorithm::SimulatedAnnealing.run(&school, 2, &ctx).unwrap();
        assert!(result.early_stopped);
        assert!(result.iterations_used < 100);
    }
}
