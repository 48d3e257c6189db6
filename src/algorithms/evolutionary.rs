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

//! Population-based evolutionary search.
//!
//! A population of snapshots evolves through elitism, tournament selection,
//! uniform per-student crossover and swap mutation. Crossover can tear
//! force groups apart and overfill classes, so every child goes through a
//! repair pipeline (locks, then capacity, then a friend-repair pass); a
//! child that cannot be repaired is replaced by a clone of its fitter
//! parent, keeping the whole scored population hard-constraint clean.

use std::collections::BTreeMap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constraints::Checker;
use crate::error::Result;
use crate::model::School;
use crate::scoring;

use super::{propose_swap, Interrupt, RunContext, RunResult};

struct Individual {
    school: School,
    score: f64,
}

impl Individual {
    fn new(school: School, ctx: &RunContext) -> Individual {
        let score = scoring::final_score(&school, ctx.config);
        Individual { school, score }
    }
}

pub(crate) fn run(school: &School, seed: u64, ctx: &RunContext) -> Result<RunResult> {
    let tic = Instant::now();
    let config = ctx.config;
    let checker = Checker::new(config);
    let knobs = &config.optimization.algorithms;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut reporter = ctx.reporter(knobs.generations);

    // Seed the population with the start plus mutated variants
    let mut population = Vec::with_capacity(knobs.population_size);
    population.push(Individual::new(school.clone(), ctx));
    while population.len() < knobs.population_size {
        let mut variant = school.clone();
        mutate(&mut variant, &checker, &mut rng);
        population.push(Individual::new(variant, ctx));
    }

    let initial_score = population[0].score;
    let mut best = school.clone();
    let mut best_score = initial_score;
    reporter.start(initial_score);

    let mut generations_run = 0usize;
    let mut stagnation = 0usize;
    let mut early_stopped = false;
    let mut cancelled = false;
    let mut timed_out = false;

    for _generation in 0..knobs.generations {
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

        population.sort_by(|a, b| b.score.partial_cmp(&a.score).expect("no NaN scores"));
        if population[0].score > best_score {
            best = population[0].school.clone();
            best_score = population[0].score;
            stagnation = 0;
        } else {
            stagnation += 1;
            if stagnation >= knobs.stagnation_limit {
                early_stopped = true;
                break;
            }
        }

        let mut next = Vec::with_capacity(knobs.population_size);
        for elite in population.iter().take(knobs.elite_size) {
            next.push(Individual {
                school: elite.school.clone(),
                score: elite.score,
            });
        }
        while next.len() < knobs.population_size {
            let a = tournament(&population, knobs.tournament_size, &mut rng);
            let b = tournament(&population, knobs.tournament_size, &mut rng);
            let (fitter, other) = if population[a].score >= population[b].score {
                (a, b)
            } else {
                (b, a)
            };
            let mut child = if rng.gen::<f64>() < knobs.crossover_rate {
                crossover(
                    &population[fitter].school,
                    &population[other].school,
                    &checker,
                    ctx,
                    &mut rng,
                )
                .unwrap_or_else(|| population[fitter].school.clone())
            } else {
                population[fitter].school.clone()
            };
            if rng.gen::<f64>() < knobs.mutation_rate {
                mutate(&mut child, &checker, &mut rng);
            }
            next.push(Individual::new(child, ctx));
        }
        population = next;
        generations_run += 1;

        let mut extras = BTreeMap::new();
        extras.insert("stagnation".to_string(), stagnation as f64);
        reporter.accepted(generations_run, population[0].score, best_score, extras);
    }

    // The final generation may hold an unharvested improvement
    if generations_run > 0 {
        for individual in &population {
            if individual.score > best_score {
                best = individual.school.clone();
                best_score = individual.score;
            }
        }
    }

    reporter.finish(generations_run, best_score, best_score);
    Ok(RunResult {
        algorithm: "evolutionary".to_string(),
        seed,
        initial_score,
        best_score,
        constraint_violations_at_end: checker.validate(&best).len(),
        best_snapshot: best,
        iterations_used: generations_run,
        early_stopped,
        cancelled,
        timed_out,
        stuck: false,
        elapsed: tic.elapsed(),
    })
}

/// Tournament of size `k`; the highest score wins, ties are broken
/// uniformly at random.
fn tournament(population: &[Individual], k: usize, rng: &mut StdRng) -> usize {
    let contestants: Vec<usize> = (0..k.max(1))
        .map(|_| rng.gen_range(0..population.len()))
        .collect();
    let top_score = contestants
        .iter()
        .map(|c| population[*c].score)
        .fold(f64::MIN, f64::max);
    let tied: Vec<usize> = contestants
        .into_iter()
        .filter(|c| population[*c].score == top_score)
        .collect();
    tied[rng.gen_range(0..tied.len())]
}

/// A small number of random legal swaps.
fn mutate(school: &mut School, checker: &Checker, rng: &mut StdRng) {
    let swaps = rng.gen_range(1..=3);
    for _ in 0..swaps {
        if let Some(next) = propose_swap(school, checker, rng) {
            *school = next;
        }
    }
}

/// Uniform per-student crossover with repair.
///
/// Each student inherits one parent's class. Repair order: force locks are
/// reinstated first (a split group follows its majority), then classes
/// over the size limit shed their most recent unlocked members to the class
/// with the smallest score loss, then a friend-repair pass runs. Returns
/// `None` when the child cannot be made hard-constraint clean.
fn crossover(
    a: &School,
    b: &School,
    checker: &Checker,
    ctx: &RunContext,
    rng: &mut StdRng,
) -> Option<School> {
    let roster = a.roster();
    let n = roster.len();
    let mut class_of: Vec<Option<usize>> = (0..n)
        .map(|i| {
            if rng.gen_bool(0.5) {
                a.class_of(i)
            } else {
                b.class_of(i)
            }
        })
        .collect();

    if checker.respects_locks() {
        for student in roster.students() {
            if let Some(c) = student.force_class {
                class_of[student.index] = Some(c);
            }
        }
        for group in roster.groups() {
            let pinned = group
                .members
                .iter()
                .find_map(|m| roster.student(*m).force_class);
            let target = pinned.or_else(|| majority_class(&class_of, &group.members));
            if let Some(target) = target {
                for &m in &group.members {
                    class_of[m] = Some(target);
                }
            }
        }
    }

    let mut child =
        School::from_assignment(roster.clone(), a.labels().to_vec(), class_of).ok()?;

    // Capacity repair
    let max_size = checker.max_class_size();
    for c in 0..child.num_classes() {
        while child.stats(c).size > max_size {
            let overflow = child
                .members(c)
                .iter()
                .rev()
                .copied()
                .find(|m| !roster.is_locked(*m))?;
            let target = best_relocation(&child, ctx, c, overflow, max_size)?;
            child.transfer(overflow, target);
        }
    }

    crate::init::repair_min_friends(&mut child, ctx.config).ok()?;
    if checker.validate(&child).is_empty() {
        Some(child)
    } else {
        None
    }
}

/// The class (other than `from`) with room whose reception of `i` costs the
/// least score, ties to the smaller class id.
fn best_relocation(
    child: &School,
    ctx: &RunContext,
    from: usize,
    i: usize,
    max_size: usize,
) -> Option<usize> {
    let mut best: Option<(f64, usize)> = None;
    for target in 0..child.num_classes() {
        if target == from || child.stats(target).size >= max_size {
            continue;
        }
        let mut probe = child.clone();
        probe.transfer(i, target);
        let score = scoring::final_score(&probe, ctx.config);
        let better = match best {
            None => true,
            Some((best_score, _)) => score > best_score,
        };
        if better {
            best = Some((score, target));
        }
    }
    best.map(|(_, target)| target)
}

/// The class holding most of `members`, ties to the smaller class index.
fn majority_class(class_of: &[Option<usize>], members: &[usize]) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for &m in members {
        if let Some(c) = class_of[m] {
            *counts.entry(c).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|(ca, na), (cb, nb)| na.cmp(nb).then(cb.cmp(ca)))
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use crate::algorithms::{Algorithm, RunContext};
    use crate::config::Config;
    use crate::constraints::Checker;
    use crate::model::Gender;
    use crate::test::{school_round_robin, student};

    fn config() -> Config {
        let mut config = Config::default();
        config.constraints.minimum_friends = 0;
        config.optimization.algorithms.population_size = 8;
        config.optimization.algorithms.generations = 12;
        config.optimization.algorithms.elite_size = 2;
        config.optimization.algorithms.stagnation_limit = 12;
        config
    }

    fn school_with_groups() -> crate::model::School {
        let mut students = Vec::new();
        for pair in 0..3u32 {
            let a_id = 740000001 + pair * 2;
            let b_id = a_id + 1;
            let mut a = student(a_id, Gender::M);
            a.preferred_friends = vec![b_id];
            let mut b = student(b_id, Gender::F);
            b.preferred_friends = vec![a_id];
            students.push(a);
            students.push(b);
        }
        let mut g1 = student(740000101, Gender::M);
        g1.force_group = Some("block".into());
        let mut g2 = student(740000102, Gender::F);
        g2.force_group = Some("block".into());
        students.push(g1);
        students.push(g2);
        let mut school = school_round_robin(students, 2);
        // co-locate the group so the start satisfies the locks
        school.transfer(7, 0);
        school
    }

    #[test]
    fn evolution_never_scores_an_invalid_snapshot() {
        let school = school_with_groups();
        let config = config();
        let ctx = RunContext::new(&config);
        let result = Algorithm::Evolutionary.run(&school, 23, &ctx).unwrap();
        assert!(result.best_score >= result.initial_score);
        assert_eq!(result.constraint_violations_at_end, 0);
        // the force group must still be together in the best snapshot
        assert_eq!(
            result.best_snapshot.class_of(6),
            result.best_snapshot.class_of(7)
        );
    }

    #[test]
    fn runs_are_reproducible() {
        let school = school_with_groups();
        let config = config();
        let ctx = RunContext::new(&config);
        let a = Algorithm::Evolutionary.run(&school, 5, &ctx).unwrap();
        let b = Algorithm::Evolutionary.run(&school, 5, &ctx).unwrap();
        assert_eq!(a.best_score, b.best_score);
        assert_eq!(a.best_snapshot, b.best_snapshot);
    }

    #[test]
    fn crossover_repairs_split_groups() {
        use rand::SeedableRng;
        let school = school_with_groups();
        let config = config();
        let ctx = RunContext::new(&config);
        let checker = Checker::new(&config);
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);

        // a second parent with the group in the other class
        let other = crate::ops::move_group(&school, &checker, "block", 1).unwrap();
        for _ in 0..10 {
            if let Some(child) = super::crossover(&school, &other, &checker, &ctx, &mut rng)
            {
                assert!(checker.validate(&child).is_empty());
                assert_eq!(child.class_of(6), child.class_of(7));
            }
        }
    }
}
