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

//! Starting-assignment construction.
//!
//! Every strategy first pins down what the hard constraints dictate (force
//! classes, then whole force groups), distributes the remaining students in
//! its own fashion, and finally runs a friend-repair pass so the returned
//! snapshot always satisfies the minimum-friends rule. A roster for which
//! no such snapshot can be built yields `InfeasibleInitialization`.

use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::config::Config;
use crate::constraints::Checker;
use crate::error::{Error, Result};
use crate::model::{Roster, School};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStrategy {
    Random,
    Balanced,
    AcademicBalanced,
    ConstraintAware,
}

impl Default for InitStrategy {
    fn default() -> Self {
        InitStrategy::ConstraintAware
    }
}

impl InitStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            InitStrategy::Random => "random",
            InitStrategy::Balanced => "balanced",
            InitStrategy::AcademicBalanced => "academic_balanced",
            InitStrategy::ConstraintAware => "constraint_aware",
        }
    }
}

impl FromStr for InitStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<InitStrategy> {
        match s {
            "random" => Ok(InitStrategy::Random),
            "balanced" => Ok(InitStrategy::Balanced),
            "academic_balanced" => Ok(InitStrategy::AcademicBalanced),
            "constraint_aware" => Ok(InitStrategy::ConstraintAware),
            _ => Err(Error::InvalidConfig {
                key: "init_strategy".to_string(),
                reason: format!("unknown strategy '{}'", s),
            }),
        }
    }
}

/// Number of classes to create for a roster of `n` students, unless the
/// configuration pins it explicitly.
pub fn target_classes(n: usize, config: &Config) -> usize {
    if let Some(k) = config.class_config.target_classes {
        return k;
    }
    match n {
        0..=25 => 1,
        26..=50 => 2,
        51..=75 => 3,
        76..=100 => 4,
        _ => ((n + 24) / 25).max(4).min(8),
    }
}

/// Default class labels "1".."k".
pub fn default_labels(k: usize) -> Vec<String> {
    (1..=k).map(|c| c.to_string()).collect()
}

/// Build a fully assigned, constraint-satisfying snapshot.
pub fn initialize(
    roster: &Arc<Roster>,
    labels: Vec<String>,
    strategy: InitStrategy,
    config: &Config,
    rng: &mut StdRng,
) -> Result<School> {
    let k = labels.len();
    let n = roster.len();
    let max_size = config.class_config.max_class_size;
    if k == 0 {
        return Err(Error::InfeasibleInitialization {
            reason: "no classes to assign into".to_string(),
        });
    }
    if n > k * max_size {
        return Err(Error::InfeasibleInitialization {
            reason: format!(
                "{} students do not fit into {} classes of at most {}",
                n, k, max_size
            ),
        });
    }

    let mut school = School::empty(roster.clone(), labels);
    place_force_locked(&mut school, config, strategy)?;

    let free: Vec<usize> = (0..n)
        .filter(|i| school.class_of(*i).is_none())
        .collect();
    match strategy {
        InitStrategy::Random => deal_round_robin(&mut school, shuffled(free, rng), max_size),
        InitStrategy::Balanced => {
            deal_round_robin(&mut school, shuffled(free, rng), max_size);
            rebalance_sizes(&mut school);
        }
        InitStrategy::AcademicBalanced => {
            let mut ordered = free;
            ordered.sort_by(|a, b| {
                let sa = school.roster().student(*a).academic_score;
                let sb = school.roster().student(*b).academic_score;
                sb.partial_cmp(&sa).unwrap().then(a.cmp(b))
            });
            deal_serpentine(&mut school, ordered, max_size);
        }
        InitStrategy::ConstraintAware => {
            for i in free {
                let c = cheapest_class(&school, i, config).ok_or_else(|| {
                    Error::InfeasibleInitialization {
                        reason: format!(
                            "no class has room for student {}",
                            school.roster().student(i).id
                        ),
                    }
                })?;
                school.assign(i, c);
            }
        }
    }

    repair_min_friends(&mut school, config)?;

    let checker = Checker::new(config);
    let violations = checker.validate(&school);
    if let Some(first) = violations.first() {
        return Err(Error::InfeasibleInitialization {
            reason: format!(
                "{} unresolved hard violations, first: {}",
                violations.len(),
                first
            ),
        });
    }
    debug!(
        "initialized {} students into {} classes with strategy {}",
        n,
        k,
        strategy.name()
    );
    Ok(school)
}

fn shuffled(mut students: Vec<usize>, rng: &mut StdRng) -> Vec<usize> {
    students.shuffle(rng);
    students
}

/// Pin force-class students, then place each force group as a block.
fn place_force_locked(
    school: &mut School,
    config: &Config,
    strategy: InitStrategy,
) -> Result<()> {
    if !config.constraints.respect_force_constraints {
        return Ok(());
    }
    let roster = school.roster().clone();
    let max_size = config.class_config.max_class_size;

    // Free-standing force-class students first; grouped students are
    // handled with their group so the group stays whole.
    for student in roster.students() {
        if let (Some(c), None) = (student.force_class, roster.group_of(student.index)) {
            if c >= school.num_classes() {
                return Err(Error::InfeasibleInitialization {
                    reason: format!(
                        "student {} is locked to a class that does not exist",
                        student.id
                    ),
                });
            }
            if school.stats(c).size >= max_size {
                return Err(Error::InfeasibleInitialization {
                    reason: format!("class {} overflows its force locks", school.label(c)),
                });
            }
            school.assign(student.index, c);
        }
    }

    for group in roster.groups() {
        if group.members.len() > max_size {
            return Err(Error::InfeasibleInitialization {
                reason: format!(
                    "force group '{}' has {} members, larger than any class",
                    group.tag,
                    group.members.len()
                ),
            });
        }
        // A member's force class binds the whole group
        let mut pinned = None;
        for &m in &group.members {
            if let Some(c) = roster.student(m).force_class {
                match pinned {
                    Some(p) if p != c => {
                        return Err(Error::InfeasibleInitialization {
                            reason: format!(
                                "force group '{}' is locked to two different classes",
                                group.tag
                            ),
                        })
                    }
                    _ => pinned = Some(c),
                }
            }
        }
        let target = match pinned {
            Some(c) if c < school.num_classes() => Some(c),
            Some(_) => {
                return Err(Error::InfeasibleInitialization {
                    reason: format!(
                        "force group '{}' is locked to a class that does not exist",
                        group.tag
                    ),
                })
            }
            None => match strategy {
                InitStrategy::ConstraintAware => {
                    least_disruptive_class(school, &group.members, config)
                }
                _ => roomiest_class(school, group.members.len(), max_size),
            },
        };
        let target = target.ok_or_else(|| Error::InfeasibleInitialization {
            reason: format!("no class can hold force group '{}'", group.tag),
        })?;
        if school.stats(target).size + group.members.len() > max_size {
            return Err(Error::InfeasibleInitialization {
                reason: format!("no class can hold force group '{}'", group.tag),
            });
        }
        for &m in &group.members {
            school.assign(m, target);
        }
    }
    Ok(())
}

/// The class with the most free seats (ties to the smaller id).
fn roomiest_class(school: &School, incoming: usize, max_size: usize) -> Option<usize> {
    (0..school.num_classes())
        .filter(|c| school.stats(*c).size + incoming <= max_size)
        .min_by_key(|c| school.stats(*c).size)
}

/// The class minimizing the group's combined disruption: dislike edges the
/// placement creates plus an overflow penalty past the preferred size.
fn least_disruptive_class(
    school: &School,
    members: &[usize],
    config: &Config,
) -> Option<usize> {
    let max_size = config.class_config.max_class_size;
    let preferred = config.class_config.preferred_class_size.max(1);
    (0..school.num_classes())
        .filter(|c| school.stats(*c).size + members.len() <= max_size)
        .min_by(|a, b| {
            let cost = |c: usize| {
                let conflicts: usize =
                    members.iter().map(|m| conflict_edges(school, *m, c)).sum();
                let new_size = school.stats(c).size + members.len();
                let overflow = new_size.saturating_sub(preferred);
                conflicts as f64 + overflow as f64
            };
            cost(*a).partial_cmp(&cost(*b)).unwrap().then(a.cmp(b))
        })
}

/// Dislike edges (both directions) between student `i` and class `c`.
fn conflict_edges(school: &School, i: usize, c: usize) -> usize {
    let roster = school.roster();
    let outgoing = roster
        .dislikes_of(i)
        .iter()
        .filter(|d| school.class_of(**d) == Some(c))
        .count();
    let incoming = school
        .members(c)
        .iter()
        .filter(|m| roster.dislikes_of(**m).contains(&i))
        .count();
    outgoing + incoming
}

fn friend_edges(school: &School, i: usize, c: usize) -> usize {
    let roster = school.roster();
    let outgoing = roster
        .friends_of(i)
        .iter()
        .filter(|f| school.class_of(**f) == Some(c))
        .count();
    let incoming = school
        .members(c)
        .iter()
        .filter(|m| roster.friends_of(**m).contains(&i))
        .count();
    outgoing + incoming
}

/// Marginal cost of adding `i` to `c`: size pressure plus weighted conflict
/// edges minus weighted friend edges (α=2, β=1). Ties go to the smaller
/// class id.
fn cheapest_class(school: &School, i: usize, config: &Config) -> Option<usize> {
    let max_size = config.class_config.max_class_size;
    let preferred = config.class_config.preferred_class_size.max(1) as f64;
    (0..school.num_classes())
        .filter(|c| school.stats(*c).size < max_size)
        .min_by(|a, b| {
            let cost = |c: usize| {
                school.stats(c).size as f64 / preferred
                    + 2.0 * conflict_edges(school, i, c) as f64
                    - friend_edges(school, i, c) as f64
            };
            cost(*a).partial_cmp(&cost(*b)).unwrap().then(a.cmp(b))
        })
}

/// Deal students into classes in rotation, skipping full classes.
fn deal_round_robin(school: &mut School, students: Vec<usize>, max_size: usize) {
    let k = school.num_classes();
    let mut c = 0;
    for i in students {
        let mut probed = 0;
        while school.stats(c).size >= max_size && probed < k {
            c = (c + 1) % k;
            probed += 1;
        }
        school.assign(i, c);
        c = (c + 1) % k;
    }
}

/// Deal students in a 0,1,…,K-1,K-1,…,1,0 pattern to equalize the mean of
/// a sorted attribute across classes.
fn deal_serpentine(school: &mut School, students: Vec<usize>, max_size: usize) {
    let k = school.num_classes();
    let order: Vec<usize> = (0..k).chain((0..k).rev()).collect();
    let mut cursor = 0;
    for i in students {
        let mut c = order[cursor % order.len()];
        let mut probed = 0;
        while school.stats(c).size >= max_size && probed < order.len() {
            cursor += 1;
            c = order[cursor % order.len()];
            probed += 1;
        }
        school.assign(i, c);
        cursor += 1;
    }
}

/// Move one unlocked student from the largest to the smallest class until
/// the size range is at most one.
fn rebalance_sizes(school: &mut School) {
    loop {
        let (mut largest, mut smallest) = (0, 0);
        for c in 0..school.num_classes() {
            if school.stats(c).size > school.stats(largest).size {
                largest = c;
            }
            if school.stats(c).size < school.stats(smallest).size {
                smallest = c;
            }
        }
        if school.stats(largest).size - school.stats(smallest).size <= 1 {
            return;
        }
        let roster = school.roster().clone();
        let candidate = school
            .members(largest)
            .iter()
            .copied()
            .find(|m| !roster.is_locked(*m));
        match candidate {
            Some(m) => school.transfer(m, smallest),
            None => return, // everything in the largest class is pinned
        }
    }
}

/// Greedy repair loop for the minimum-friends rule.
///
/// Each pass tries, for every deficient student, to move them next to their
/// friends, or failing that to pull one of their friends over. A pass that
/// makes no progress ends the loop; remaining deficits make the
/// initialization infeasible (reported by the caller's final validation).
pub(crate) fn repair_min_friends(school: &mut School, config: &Config) -> Result<()> {
    let checker = Checker::new(config);
    if config.constraints.minimum_friends == 0 {
        return Ok(());
    }
    let roster = school.roster().clone();
    let max_passes = roster.len().max(4);

    for _pass in 0..max_passes {
        let deficient: Vec<usize> = (0..roster.len())
            .filter(|i| !checker.min_friends_ok(school, *i))
            .collect();
        if deficient.is_empty() {
            return Ok(());
        }
        let mut progressed = false;
        for i in deficient {
            if checker.min_friends_ok(school, i) {
                continue;
            }
            if try_reunite(school, &checker, i) {
                progressed = true;
            }
        }
        if !progressed {
            return Ok(()); // caller's validation reports what is left
        }
    }
    Ok(())
}

/// Try to fix student `i`'s friend deficit: move `i` to a class holding
/// enough friends, otherwise move a friend into `i`'s class. Both moves go
/// through the checked operations so no other student is stranded.
fn try_reunite(school: &mut School, checker: &Checker, i: usize) -> bool {
    let roster = school.roster().clone();
    let required = checker.required_friends(school, i);

    let mut targets: Vec<usize> = (0..school.num_classes()).collect();
    targets.sort_by_key(|c| {
        std::cmp::Reverse(
            roster
                .friends_of(i)
                .iter()
                .filter(|f| school.class_of(**f) == Some(*c))
                .count(),
        )
    });
    for c in targets {
        if Some(c) == school.class_of(i) {
            continue;
        }
        let placed = roster
            .friends_of(i)
            .iter()
            .filter(|f| school.class_of(**f) == Some(c))
            .count();
        if placed < required {
            break; // sorted descending, nothing better follows
        }
        if let Ok(next) = crate::ops::move_student(school, checker, i, c) {
            *school = next;
            return true;
        }
    }

    // Pull a friend over instead
    let own_class = match school.class_of(i) {
        Some(c) => c,
        None => return false,
    };
    for &f in roster.friends_of(i) {
        if school.class_of(f) == Some(own_class) {
            continue;
        }
        if let Ok(next) = crate::ops::move_student(school, checker, f, own_class) {
            *school = next;
            return true;
        }
    }
    false
}
