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

//! Greedy local search: exhaustive best-move passes over the students.
//!
//! One pass considers every student in roster order and applies, per
//! student, the single best strictly improving move or swap. Ties are
//! broken towards the smaller target class and then the smaller partner id,
//! so a pass is fully deterministic and needs no randomness at all.

use std::collections::BTreeMap;
use std::time::Instant;

use ordered_float::NotNan;

use crate::constraints::Checker;
use crate::error::Result;
use crate::model::{School, StudentId};
use crate::ops;
use crate::scoring;

use super::{Interrupt, RunContext, RunResult};

/// The best candidate move for one student, ordered by descending delta,
/// then ascending target class, with plain moves before swaps.
#[derive(Debug, Clone)]
struct Candidate {
    delta: NotNan<f64>,
    target_class: usize,
    partner: Option<StudentId>,
    snapshot: School,
    score: f64,
}

impl Candidate {
    fn beats(&self, other: &Option<Candidate>) -> bool {
        match other {
            None => true,
            Some(other) => {
                (self.delta, std::cmp::Reverse(self.target_class))
                    > (other.delta, std::cmp::Reverse(other.target_class))
                    || (self.delta == other.delta
                        && self.target_class == other.target_class
                        && partner_rank(self.partner) < partner_rank(other.partner))
            }
        }
    }
}

fn partner_rank(partner: Option<StudentId>) -> (u8, StudentId) {
    match partner {
        None => (0, 0),
        Some(id) => (1, id),
    }
}

pub(crate) fn run(school: &School, seed: u64, ctx: &RunContext) -> Result<RunResult> {
    let tic = Instant::now();
    let config = ctx.config;
    let checker = Checker::new(config);
    let knobs = &config.optimization.algorithms;

    let mut current = school.clone();
    let mut current_score = scoring::final_score(&current, config);
    let initial_score = current_score;

    let n = school.roster().len();
    let mut reporter = ctx.reporter(knobs.max_passes * n);
    reporter.start(initial_score);

    let mut iterations = 0usize;
    let mut early_stopped = false;
    let mut cancelled = false;
    let mut timed_out = false;

    'passes: for _pass in 0..knobs.max_passes {
        let mut pass_improvement = 0.0;
        let mut pass_moved = false;

        for i in 0..n {
            match ctx.interrupted() {
                Some(Interrupt::Cancelled) => {
                    cancelled = true;
                    break 'passes;
                }
                Some(Interrupt::TimedOut) => {
                    timed_out = true;
                    break 'passes;
                }
                None => {}
            }

            if let Some(candidate) = best_candidate(&current, current_score, &checker, i, ctx)
            {
                current = candidate.snapshot;
                pass_improvement += candidate.score - current_score;
                current_score = candidate.score;
                pass_moved = true;
                iterations += 1;
                reporter.accepted(iterations, current_score, current_score, BTreeMap::new());
            }
        }

        if !pass_moved || pass_improvement < knobs.min_improvement {
            early_stopped = true;
            break;
        }
    }

    reporter.finish(iterations, current_score, current_score);
    Ok(RunResult {
        algorithm: "local_search".to_string(),
        seed,
        initial_score,
        best_score: current_score,
        constraint_violations_at_end: checker.validate(&current).len(),
        best_snapshot: current,
        iterations_used: iterations,
        early_stopped,
        cancelled,
        timed_out,
        stuck: false,
        elapsed: tic.elapsed(),
    })
}

/// The highest positive-delta legal move or swap for student `i`, if any.
fn best_candidate(
    current: &School,
    current_score: f64,
    checker: &Checker,
    i: usize,
    ctx: &RunContext,
) -> Option<Candidate> {
    let roster = current.roster();
    let mut best: Option<Candidate> = None;
    let mut consider = |snapshot: School, target_class: usize, partner: Option<StudentId>| {
        let score = scoring::final_score(&snapshot, ctx.config);
        let delta = score - current_score;
        if delta <= 0.0 {
            return;
        }
        let candidate = Candidate {
            delta: NotNan::new(delta).expect("scores are never NaN"),
            target_class,
            partner,
            snapshot,
            score,
        };
        if candidate.beats(&best) {
            best = Some(candidate);
        }
    };

    for target in 0..current.num_classes() {
        if Some(target) == current.class_of(i) {
            continue;
        }
        if let Ok(snapshot) = ops::move_student(current, checker, i, target) {
            consider(snapshot, target, None);
        }
        for &b in current.members(target) {
            if roster.is_locked(b) {
                continue;
            }
            if let Ok(snapshot) = ops::swap_students(current, checker, i, b) {
                consider(snapshot, target, Some(roster.student(b).id));
            }
        }
    }
    best
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
        config
    }

    #[test]
    fn reunites_a_split_pair_deterministically() {
        let mut a = student(710000001, Gender::M);
        a.preferred_friends = vec![710000002];
        let mut b = student(710000002, Gender::F);
        b.preferred_friends = vec![710000001];
        let c = student(710000003, Gender::M);
        let d = student(710000004, Gender::F);
        // a,c in class 0; b,d in class 1
        let school = school_round_robin(vec![a, b, c, d], 2);

        let config = config();
        let ctx = RunContext::new(&config);
        let first = Algorithm::LocalSearch.run(&school, 0, &ctx).unwrap();
        let second = Algorithm::LocalSearch.run(&school, 99, &ctx).unwrap();

        assert!(first.best_score > first.initial_score);
        assert_eq!(
            first.best_snapshot.class_of(0),
            first.best_snapshot.class_of(1)
        );
        // seed-independent: the search uses no randomness
        assert_eq!(first.best_score, second.best_score);
        assert_eq!(first.best_snapshot, second.best_snapshot);
    }

    #[test]
    fn stops_when_no_move_improves() {
        // dealt round-robin this yields one M and one F per class
        let school = school_round_robin(
            vec![
                student(720000001, Gender::M),
                student(720000002, Gender::M),
                student(720000003, Gender::F),
                student(720000004, Gender::F),
            ],
            2,
        );
        let config = config();
        let ctx = RunContext::new(&config);
        let result = Algorithm::LocalSearch.run(&school, 0, &ctx).unwrap();
        // both classes already balanced: nothing to do
        assert_eq!(result.iterations_used, 0);
        assert!(result.early_stopped);
        assert_eq!(result.best_score, result.initial_score);
    }
}
