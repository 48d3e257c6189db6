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

//! Hard-constraint validation: placement locks and minimum friends.
//!
//! The checker only ever *reports*; it never repairs. Algorithms consult it
//! through the neighborhood operations, which reject any proposal that would
//! introduce a violation.

use std::fmt;

use crate::config::Config;
use crate::model::{School, StudentId};

/// Assignment state of a snapshot as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentState {
    /// Every student is placed and the placement is consistent with locks
    FullyAssigned,
    /// Some students are placed, the rest are pending
    PartiallyAssigned,
    /// No student is placed
    Unassigned,
    /// Placed students contradict a force lock; the assignment cannot be
    /// kept as-is
    Mixed,
}

/// A single hard-constraint violation.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    ForceClass {
        student: StudentId,
        expected: String,
        actual: Option<String>,
    },
    SplitGroup {
        tag: String,
    },
    MinFriends {
        student: StudentId,
        required: usize,
        placed: usize,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::ForceClass {
                student,
                expected,
                actual,
            } => write!(
                f,
                "student {} must be in class {} but is in {}",
                student,
                expected,
                actual.as_deref().unwrap_or("no class")
            ),
            Violation::SplitGroup { tag } => {
                write!(f, "force group '{}' is split across classes", tag)
            }
            Violation::MinFriends {
                student,
                required,
                placed,
            } => write!(
                f,
                "student {} has {} of the required {} preferred friends in class",
                student, placed, required
            ),
        }
    }
}

/// Stateless checker over a configuration.
pub struct Checker<'a> {
    config: &'a Config,
}

impl<'a> Checker<'a> {
    pub fn new(config: &'a Config) -> Checker<'a> {
        Checker { config }
    }

    fn respect_locks(&self) -> bool {
        self.config.constraints.respect_force_constraints
    }

    /// Whether force locks are enforced at all (`respect_force_constraints`).
    pub fn respects_locks(&self) -> bool {
        self.respect_locks()
    }

    /// Hard upper bound on class size.
    pub fn max_class_size(&self) -> usize {
        self.config.class_config.max_class_size
    }

    /// Minimum number of friends student `i` needs in class:
    /// `min(m, |preferred_friends|)`, 0 for students without preferences.
    pub fn required_friends(&self, school: &School, i: usize) -> usize {
        let friends = school.roster().friends_of(i).len();
        if friends == 0 {
            0
        } else {
            self.config.constraints.minimum_friends.min(friends)
        }
    }

    /// Whether student `i` currently satisfies the minimum-friends rule.
    /// Unassigned students are not checked.
    pub fn min_friends_ok(&self, school: &School, i: usize) -> bool {
        school.class_of(i).is_none()
            || school.placed_friends(i) >= self.required_friends(school, i)
    }

    /// Lock-level legality of moving a single student. Force-group members
    /// can only travel with their group (see `is_group_move_allowed`).
    pub fn is_move_allowed(&self, school: &School, i: usize, target: usize) -> bool {
        if target >= school.num_classes() || school.class_of(i) == Some(target) {
            return false;
        }
        if !self.respect_locks() {
            return true;
        }
        let roster = school.roster();
        if roster.group_of(i).is_some() {
            return false;
        }
        match roster.student(i).force_class {
            Some(c) => c == target,
            None => true,
        }
    }

    /// Lock-level legality of swapping two students between their classes.
    pub fn is_swap_allowed(&self, school: &School, a: usize, b: usize) -> bool {
        if a == b {
            return false;
        }
        let (ca, cb) = (school.class_of(a), school.class_of(b));
        if ca.is_none() || cb.is_none() || ca == cb {
            return false;
        }
        if !self.respect_locks() {
            return true;
        }
        let roster = school.roster();
        !roster.is_locked(a) && !roster.is_locked(b)
    }

    /// Lock-level legality of moving a whole force group to `target`.
    pub fn is_group_move_allowed(&self, school: &School, group: usize, target: usize) -> bool {
        if target >= school.num_classes() {
            return false;
        }
        let roster = school.roster();
        roster.groups()[group]
            .members
            .iter()
            .all(|m| match roster.student(*m).force_class {
                Some(c) => !self.respect_locks() || c == target,
                None => true,
            })
    }

    /// Per-student minimum-friends deficits, ascending by student id.
    pub fn min_friends_violations(&self, school: &School) -> Vec<Violation> {
        let mut violations: Vec<Violation> = (0..school.roster().len())
            .filter(|i| !self.min_friends_ok(school, *i))
            .map(|i| Violation::MinFriends {
                student: school.roster().student(i).id,
                required: self.required_friends(school, i),
                placed: school.placed_friends(i),
            })
            .collect();
        violations.sort_by_key(|v| match v {
            Violation::MinFriends { student, .. } => *student,
            _ => unreachable!(),
        });
        violations
    }

    /// All hard-constraint violations of a snapshot, in stable order: force
    /// classes by student id, split groups in roster order, then
    /// minimum-friends deficits by student id.
    pub fn validate(&self, school: &School) -> Vec<Violation> {
        let mut violations = Vec::new();
        let roster = school.roster();
        if self.respect_locks() {
            let mut lock_violations: Vec<Violation> = roster
                .students()
                .iter()
                .filter_map(|s| {
                    let expected = s.force_class?;
                    if school.class_of(s.index) == Some(expected) {
                        None
                    } else {
                        Some(Violation::ForceClass {
                            student: s.id,
                            expected: school.label(expected).to_string(),
                            actual: school
                                .class_of(s.index)
                                .map(|c| school.label(c).to_string()),
                        })
                    }
                })
                .collect();
            lock_violations.sort_by_key(|v| match v {
                Violation::ForceClass { student, .. } => *student,
                _ => unreachable!(),
            });
            violations.append(&mut lock_violations);

            for group in roster.groups() {
                let mut classes = group.members.iter().map(|m| school.class_of(*m));
                let first = classes.next().unwrap_or(None);
                if classes.any(|c| c != first) {
                    violations.push(Violation::SplitGroup {
                        tag: group.tag.clone(),
                    });
                }
            }
        }
        violations.extend(self.min_friends_violations(school));
        violations
    }

    /// Classify the assignment state of a snapshot.
    ///
    /// Placed students that contradict a force lock make the state `Mixed`
    /// regardless of coverage: such an assignment has to be rebuilt before
    /// optimization can start.
    pub fn classify(&self, school: &School) -> AssignmentState {
        let assigned = school.assigned_count();
        if assigned == 0 {
            return AssignmentState::Unassigned;
        }
        if self.respect_locks() {
            let roster = school.roster();
            let lock_broken = roster.students().iter().any(|s| match s.force_class {
                Some(c) => {
                    school.class_of(s.index).is_some() && school.class_of(s.index) != Some(c)
                }
                None => false,
            }) || roster.groups().iter().any(|g| {
                let mut placed = g
                    .members
                    .iter()
                    .filter_map(|m| school.class_of(*m))
                    .peekable();
                match placed.peek().copied() {
                    Some(first) => placed.any(|c| c != first),
                    None => false,
                }
            });
            if lock_broken {
                return AssignmentState::Mixed;
            }
        }
        if assigned == school.roster().len() {
            AssignmentState::FullyAssigned
        } else {
            AssignmentState::PartiallyAssigned
        }
    }
}
