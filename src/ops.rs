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

//! Neighborhood operations: the only doorway through which algorithms
//! change an assignment.
//!
//! Every operation is pure: it takes a snapshot by reference and either
//! returns a new snapshot with the move applied or a [`Rejection`] naming
//! the reason. A rejection is a normal outcome on the optimization hot
//! path, not an error.

use std::fmt;

use crate::constraints::Checker;
use crate::model::{School, StudentId};

/// Why a proposed operation is not legal.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// The student is locked to a class inconsistent with the proposal
    ForceLocked { student: StudentId },
    /// The student belongs to a force group; only whole-group moves apply
    InForceGroup { student: StudentId },
    /// Source and target class are the same (or the target does not exist)
    NoOpMove,
    /// The student is not assigned yet
    Unassigned { student: StudentId },
    /// The target class cannot take the students without exceeding the
    /// maximum class size
    Capacity { class: String },
    /// The result would leave a student below their minimum-friends bound
    MinFriends { student: StudentId },
    /// No force group carries the given tag
    UnknownGroup { tag: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::ForceLocked { student } => {
                write!(f, "student {} is locked to another class", student)
            }
            Rejection::InForceGroup { student } => {
                write!(f, "student {} can only move with their force group", student)
            }
            Rejection::NoOpMove => write!(f, "move has no effect"),
            Rejection::Unassigned { student } => {
                write!(f, "student {} is not assigned to a class", student)
            }
            Rejection::Capacity { class } => {
                write!(f, "class {} cannot take more students", class)
            }
            Rejection::MinFriends { student } => write!(
                f,
                "student {} would fall below their minimum-friends bound",
                student
            ),
            Rejection::UnknownGroup { tag } => write!(f, "no force group tagged '{}'", tag),
        }
    }
}

/// Check the minimum-friends rule for every student whose placed-friend
/// count the mutation can have changed.
fn check_affected(
    school: &School,
    checker: &Checker,
    moved: &[usize],
) -> Result<(), Rejection> {
    let roster = school.roster();
    for &m in moved {
        if !checker.min_friends_ok(school, m) {
            return Err(Rejection::MinFriends {
                student: roster.student(m).id,
            });
        }
        for &fan in roster.fans_of(m) {
            if !checker.min_friends_ok(school, fan) {
                return Err(Rejection::MinFriends {
                    student: roster.student(fan).id,
                });
            }
        }
    }
    Ok(())
}

/// Move one student to `target`.
///
/// Rejected if the student is force-locked elsewhere, belongs to a force
/// group, the target is full, or the move would leave any affected student
/// below their minimum-friends bound.
pub fn move_student(
    school: &School,
    checker: &Checker,
    i: usize,
    target: usize,
) -> Result<School, Rejection> {
    let roster = school.roster();
    let id = roster.student(i).id;
    if target >= school.num_classes() || school.class_of(i) == Some(target) {
        return Err(Rejection::NoOpMove);
    }
    if school.class_of(i).is_none() {
        return Err(Rejection::Unassigned { student: id });
    }
    if checker.respects_locks() {
        if roster.group_of(i).is_some() {
            return Err(Rejection::InForceGroup { student: id });
        }
        if let Some(c) = roster.student(i).force_class {
            if c != target {
                return Err(Rejection::ForceLocked { student: id });
            }
        }
    }
    if school.stats(target).size + 1 > checker.max_class_size() {
        return Err(Rejection::Capacity {
            class: school.label(target).to_string(),
        });
    }

    let mut next = school.clone();
    next.transfer(i, target);
    check_affected(&next, checker, &[i])?;
    Ok(next)
}

/// Swap two students between their classes.
///
/// Rejected if either student is force-locked or in a force group, both are
/// in the same class, or the result violates minimum friends for any
/// affected student.
pub fn swap_students(
    school: &School,
    checker: &Checker,
    a: usize,
    b: usize,
) -> Result<School, Rejection> {
    let roster = school.roster();
    if a == b || school.class_of(a) == school.class_of(b) {
        return Err(Rejection::NoOpMove);
    }
    let (ca, cb) = match (school.class_of(a), school.class_of(b)) {
        (Some(ca), Some(cb)) => (ca, cb),
        (None, _) => {
            return Err(Rejection::Unassigned {
                student: roster.student(a).id,
            })
        }
        (_, None) => {
            return Err(Rejection::Unassigned {
                student: roster.student(b).id,
            })
        }
    };
    if checker.respects_locks() {
        for &s in &[a, b] {
            if roster.group_of(s).is_some() {
                return Err(Rejection::InForceGroup {
                    student: roster.student(s).id,
                });
            }
            if roster.student(s).force_class.is_some() {
                return Err(Rejection::ForceLocked {
                    student: roster.student(s).id,
                });
            }
        }
    }

    let mut next = school.clone();
    next.transfer(a, cb);
    next.transfer(b, ca);
    check_affected(&next, checker, &[a, b])?;
    Ok(next)
}

/// Move a whole force group to `target`, atomically.
///
/// Rejected if any member carries a `force_class` inconsistent with the
/// target, the target cannot hold the group, or the result violates
/// minimum friends for any affected student.
pub fn move_group(
    school: &School,
    checker: &Checker,
    tag: &str,
    target: usize,
) -> Result<School, Rejection> {
    let roster = school.roster();
    let group = roster
        .groups()
        .iter()
        .position(|g| g.tag == tag)
        .ok_or_else(|| Rejection::UnknownGroup {
            tag: tag.to_string(),
        })?;
    if target >= school.num_classes() {
        return Err(Rejection::NoOpMove);
    }
    let members: Vec<usize> = roster.groups()[group].members.clone();
    if members
        .iter()
        .all(|m| school.class_of(*m) == Some(target))
    {
        return Err(Rejection::NoOpMove);
    }
    if checker.respects_locks() {
        for &m in &members {
            if let Some(c) = roster.student(m).force_class {
                if c != target {
                    return Err(Rejection::ForceLocked {
                        student: roster.student(m).id,
                    });
                }
            }
        }
    }
    let incoming = members
        .iter()
        .filter(|m| school.class_of(**m) != Some(target))
        .count();
    if school.stats(target).size + incoming > checker.max_class_size() {
        return Err(Rejection::Capacity {
            class: school.label(target).to_string(),
        });
    }

    let mut next = school.clone();
    for &m in &members {
        match next.class_of(m) {
            Some(c) if c == target => {}
            Some(_) => next.transfer(m, target),
            None => next.assign(m, target),
        }
    }
    check_affected(&next, checker, &members)?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::Gender;
    use crate::test::{school_round_robin, student};

    fn config(m: usize) -> Config {
        let mut config = Config::default();
        config.constraints.minimum_friends = m;
        config
    }

    #[test]
    fn operations_leave_the_input_untouched() {
        let school = school_round_robin(
            vec![
                student(100000001, Gender::M),
                student(100000002, Gender::F),
            ],
            2,
        );
        let config = config(0);
        let checker = Checker::new(&config);
        let before = school.clone();
        let moved = move_student(&school, &checker, 0, 1).unwrap();
        assert_eq!(school, before);
        assert_ne!(moved, school);
        assert_eq!(moved.class_of(0), Some(1));
    }

    #[test]
    fn double_swap_restores_the_snapshot() {
        let school = school_round_robin(
            vec![
                student(100000001, Gender::M),
                student(100000002, Gender::F),
                student(100000003, Gender::M),
                student(100000004, Gender::F),
            ],
            2,
        );
        let config = config(0);
        let checker = Checker::new(&config);
        let once = swap_students(&school, &checker, 0, 1).unwrap();
        let twice = swap_students(&once, &checker, 0, 1).unwrap();
        assert_eq!(twice, school);
    }

    #[test]
    fn group_moves_are_atomic() {
        let mut a = student(100000001, Gender::M);
        a.force_group = Some("g1".into());
        let mut b = student(100000002, Gender::M);
        b.force_group = Some("g1".into());
        let c = student(100000003, Gender::F);
        let d = student(100000004, Gender::F);
        let mut school = school_round_robin(vec![a, b, c, d], 2);
        school.transfer(1, 0);

        let config = config(0);
        let checker = Checker::new(&config);
        assert_eq!(
            move_student(&school, &checker, 0, 1),
            Err(Rejection::InForceGroup {
                student: 100000001
            })
        );
        let moved = move_group(&school, &checker, "g1", 1).unwrap();
        assert_eq!(moved.class_of(0), Some(1));
        assert_eq!(moved.class_of(1), Some(1));

        let mut tight = crate::ops::tests::config(0);
        tight.class_config.max_class_size = 2;
        let tight_checker = Checker::new(&tight);
        assert_eq!(
            move_group(&school, &tight_checker, "g1", 1),
            Err(Rejection::Capacity {
                class: "2".to_string()
            })
        );
        assert_eq!(
            move_group(&school, &checker, "nope", 1),
            Err(Rejection::UnknownGroup {
                tag: "nope".to_string()
            })
        );
    }

    #[test]
    fn min_friends_guards_every_affected_student() {
        // class 0: x (friends y, z), y, z; class 1: three strangers
        let mut x = student(100000001, Gender::M);
        x.preferred_friends = vec![100000002, 100000003];
        let y = student(100000002, Gender::M);
        let z = student(100000003, Gender::M);
        let s1 = student(100000004, Gender::F);
        let s2 = student(100000005, Gender::F);
        let s3 = student(100000006, Gender::F);
        let mut school = school_round_robin(vec![x, y, z, s1, s2, s3], 2);
        school.transfer(1, 0); // y joins x and z in class 0
        school.transfer(4, 1); // keep sizes 3/3

        let config = config(1);
        let checker = Checker::new(&config);

        // swapping y away still leaves z with x
        let after = swap_students(&school, &checker, 1, 3).unwrap();
        assert_eq!(after.class_of(1), Some(1));

        // now also swapping z away would strand x
        assert_eq!(
            swap_students(&after, &checker, 2, 4),
            Err(Rejection::MinFriends {
                student: 100000001
            })
        );
    }
}
