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

//! The domain model: students, classes and the school snapshot.
//!
//! The snapshot is laid out as packed arrays indexed by student position
//! (`class_of[i]`) and class position (`members[c]`), so a deep copy is a
//! flat copy of a few vectors and never allocates per-student nodes. The
//! immutable roster data (students, resolved preference edges, force groups)
//! is shared between snapshots through an `Arc`, so cloning a snapshot for
//! comparison or backtracking is cheap.
//!
//! All class aggregates (size, gender counts, academic/behavior sums,
//! assistance count, origin multiset) are maintained incrementally by the
//! mutation primitives, so the scorer never has to re-aggregate a class from
//! scratch.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A student's 9-digit identifier, unique within a run.
pub type StudentId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    M,
    F,
}

impl Gender {
    pub fn parse(s: &str) -> Option<Gender> {
        match s.trim() {
            "M" => Some(Gender::M),
            "F" => Some(Gender::F),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::M => "M",
            Gender::F => "F",
        }
    }
}

/// Ordinal rank A..D (A best). Missing values default to A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rank {
    A,
    B,
    C,
    D,
}

impl Rank {
    pub fn parse(s: &str) -> Option<Rank> {
        match s.trim() {
            "" => Some(Rank::A),
            "A" => Some(Rank::A),
            "B" => Some(Rank::B),
            "C" => Some(Rank::C),
            "D" => Some(Rank::D),
            _ => None,
        }
    }

    /// Numeric conversion A=1 .. D=4.
    pub fn points(&self) -> f64 {
        match self {
            Rank::A => 1.0,
            Rank::B => 2.0,
            Rank::C => 3.0,
            Rank::D => 4.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::A => "A",
            Rank::B => "B",
            Rank::C => "C",
            Rank::D => "D",
        }
    }
}

/// Representation of a single student's roster data.
///
/// Students are immutable once the roster is built; only their class
/// membership changes during optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    /// Position of the student in the roster's packed arrays
    pub index: usize,
    /// 9-digit identifier, unique within a run
    pub id: StudentId,
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    /// Academic score in [0, 100]
    pub academic_score: f64,
    pub behavior_rank: Rank,
    pub studentiality_rank: Rank,
    pub assistance_package: bool,
    /// School of origin; the empty string means unknown and is ignored by
    /// all origin metrics
    pub school_of_origin: String,
    /// Up to three peer ids the student wants to share a class with
    pub preferred_friends: Vec<StudentId>,
    /// Up to five peer ids the student wants to avoid
    pub disliked_peers: Vec<StudentId>,
    /// Class index the student is locked into, if any
    pub force_class: Option<usize>,
    /// Force-group tag; all students sharing a non-empty tag co-locate
    pub force_group: Option<String>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A set of students that must end up in the same class.
#[derive(Debug, Clone)]
pub struct ForceGroup {
    pub tag: String,
    /// Member positions in the roster, ascending
    pub members: Vec<usize>,
}

/// The immutable part of a school snapshot: the students themselves plus all
/// data derived purely from them (resolved preference edges, force groups,
/// preserved input columns).
#[derive(Debug)]
pub struct Roster {
    students: Vec<Student>,
    /// `preferred_friends` resolved to roster positions
    friends_of: Vec<Vec<usize>>,
    /// `disliked_peers` resolved to roster positions
    dislikes_of: Vec<Vec<usize>>,
    /// Reverse friend edges: `fans_of[i]` lists everyone who names `i` as a
    /// preferred friend. Used to find all students affected by a move.
    fans_of: Vec<Vec<usize>>,
    groups: Vec<ForceGroup>,
    group_of: Vec<Option<usize>>,
    /// Input column names, in input order
    columns: Vec<String>,
    /// Per-student raw values of columns the core does not interpret
    extras: Vec<BTreeMap<String, String>>,
}

impl Roster {
    /// Build a roster from parsed students.
    ///
    /// Applies the reference-cleanup invariants: duplicates and
    /// self-references are dropped from both peer lists, a dislike of the
    /// same peer wins over a preference, and the lists are capped at three
    /// preferred friends and five disliked peers. Force groups are collected
    /// from the students' tags.
    ///
    /// Fails with `Error::DataReference` if a peer list or force group names
    /// an id that is not in the roster.
    pub fn new(
        mut students: Vec<Student>,
        columns: Vec<String>,
        extras: Vec<BTreeMap<String, String>>,
    ) -> Result<Roster> {
        let mut index_by_id = BTreeMap::new();
        for (i, s) in students.iter_mut().enumerate() {
            s.index = i;
            index_by_id.insert(s.id, i);
        }

        let mut friends_of = Vec::with_capacity(students.len());
        let mut dislikes_of = Vec::with_capacity(students.len());
        for s in students.iter_mut() {
            let dislikes = clean_peer_list(s.id, &mut s.disliked_peers, 5, &[]);
            let friends = clean_peer_list(s.id, &mut s.preferred_friends, 3, &dislikes);
            let resolve = |ids: &[StudentId], kind: &'static str| -> Result<Vec<usize>> {
                ids.iter()
                    .map(|id| {
                        index_by_id
                            .get(id)
                            .copied()
                            .ok_or(Error::DataReference { kind, id: *id })
                    })
                    .collect()
            };
            friends_of.push(resolve(&friends, "preferred_friends")?);
            dislikes_of.push(resolve(&dislikes, "disliked_peers")?);
        }

        let mut fans_of = vec![Vec::new(); students.len()];
        for (i, friends) in friends_of.iter().enumerate() {
            for f in friends {
                fans_of[*f].push(i);
            }
        }

        // Collect force groups in first-appearance order of their tags
        let mut groups: Vec<ForceGroup> = Vec::new();
        let mut group_of = vec![None; students.len()];
        for (i, s) in students.iter().enumerate() {
            let tag = match &s.force_group {
                Some(t) if !t.is_empty() => t.clone(),
                _ => continue,
            };
            let g = match groups.iter().position(|g| g.tag == tag) {
                Some(g) => g,
                None => {
                    groups.push(ForceGroup {
                        tag,
                        members: Vec::new(),
                    });
                    groups.len() - 1
                }
            };
            groups[g].members.push(i);
            group_of[i] = Some(g);
        }

        let extras = if extras.is_empty() {
            vec![BTreeMap::new(); students.len()]
        } else {
            extras
        };
        debug_assert_eq!(extras.len(), students.len());

        Ok(Roster {
            friends_of,
            dislikes_of,
            fans_of,
            groups,
            group_of,
            columns,
            extras,
            students,
        })
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn student(&self, i: usize) -> &Student {
        &self.students[i]
    }

    /// Roster position for a student id, if the id is known.
    pub fn index_of(&self, id: StudentId) -> Option<usize> {
        self.students.iter().position(|s| s.id == id)
    }

    pub fn friends_of(&self, i: usize) -> &[usize] {
        &self.friends_of[i]
    }

    pub fn dislikes_of(&self, i: usize) -> &[usize] {
        &self.dislikes_of[i]
    }

    pub fn fans_of(&self, i: usize) -> &[usize] {
        &self.fans_of[i]
    }

    pub fn groups(&self) -> &[ForceGroup] {
        &self.groups
    }

    pub fn group_of(&self, i: usize) -> Option<usize> {
        self.group_of[i]
    }

    /// A student is locked if a force class or force group applies to them.
    pub fn is_locked(&self, i: usize) -> bool {
        self.students[i].force_class.is_some() || self.group_of[i].is_some()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn extras(&self, i: usize) -> &BTreeMap<String, String> {
        &self.extras[i]
    }
}

/// Drop duplicates, self-references and entries of `losers` from a peer id
/// list and cap it at `cap` entries, preserving order. Returns the cleaned
/// list (also written back to the student).
fn clean_peer_list(
    own_id: StudentId,
    list: &mut Vec<StudentId>,
    cap: usize,
    losers: &[StudentId],
) -> Vec<StudentId> {
    let mut seen = Vec::new();
    for id in list.iter() {
        if *id == own_id || seen.contains(id) || losers.contains(id) {
            continue;
        }
        seen.push(*id);
        if seen.len() == cap {
            break;
        }
    }
    *list = seen.clone();
    seen
}

/// Incrementally maintained aggregates of one class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassStats {
    pub size: usize,
    pub male: usize,
    pub female: usize,
    pub academic_sum: f64,
    pub behavior_sum: f64,
    pub studentiality_sum: f64,
    pub assistance: usize,
    /// Multiset of non-empty schools of origin
    pub origins: BTreeMap<String, usize>,
}

impl ClassStats {
    fn add(&mut self, s: &Student) {
        self.size += 1;
        match s.gender {
            Gender::M => self.male += 1,
            Gender::F => self.female += 1,
        }
        self.academic_sum += s.academic_score;
        self.behavior_sum += s.behavior_rank.points();
        self.studentiality_sum += s.studentiality_rank.points();
        if s.assistance_package {
            self.assistance += 1;
        }
        if !s.school_of_origin.is_empty() {
            *self.origins.entry(s.school_of_origin.clone()).or_insert(0) += 1;
        }
    }

    fn remove(&mut self, s: &Student) {
        self.size -= 1;
        match s.gender {
            Gender::M => self.male -= 1,
            Gender::F => self.female -= 1,
        }
        self.academic_sum -= s.academic_score;
        self.behavior_sum -= s.behavior_rank.points();
        self.studentiality_sum -= s.studentiality_rank.points();
        if s.assistance_package {
            self.assistance -= 1;
        }
        if !s.school_of_origin.is_empty() {
            let count = self
                .origins
                .get_mut(&s.school_of_origin)
                .expect("origin multiset out of sync");
            *count -= 1;
            if *count == 0 {
                self.origins.remove(&s.school_of_origin);
            }
        }
    }

    pub fn mean_academic(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.academic_sum / self.size as f64
        }
    }

    pub fn mean_behavior(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.behavior_sum / self.size as f64
        }
    }

    pub fn mean_studentiality(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.studentiality_sum / self.size as f64
        }
    }

    /// Largest share any single origin holds of the class, 0.0 for classes
    /// without origin data.
    pub fn dominant_origin_share(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.origins
            .values()
            .map(|n| *n as f64 / self.size as f64)
            .fold(0.0, f64::max)
    }
}

/// A complete school snapshot: the shared roster plus the mutable assignment
/// of students to classes.
///
/// Cloning a snapshot is O(N) over students and classes and shares the
/// roster. Two snapshots compare equal when they assign every student to the
/// same class; member insertion order is not part of equality.
#[derive(Debug, Clone)]
pub struct School {
    roster: Arc<Roster>,
    labels: Vec<String>,
    class_of: Vec<Option<usize>>,
    members: Vec<Vec<usize>>,
    stats: Vec<ClassStats>,
}

impl PartialEq for School {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels && self.class_of == other.class_of
    }
}

impl School {
    /// A snapshot with `labels.len()` empty classes and every student
    /// unassigned.
    pub fn empty(roster: Arc<Roster>, labels: Vec<String>) -> School {
        let n = roster.len();
        let k = labels.len();
        School {
            roster,
            labels,
            class_of: vec![None; n],
            members: vec![Vec::new(); k],
            stats: vec![ClassStats::default(); k],
        }
    }

    /// Rebuild a snapshot from a complete per-student class vector, as used
    /// by the importer and by crossover repair.
    pub fn from_assignment(
        roster: Arc<Roster>,
        labels: Vec<String>,
        class_of: Vec<Option<usize>>,
    ) -> Result<School> {
        assert_eq!(class_of.len(), roster.len());
        let mut school = School::empty(roster, labels);
        for (i, class) in class_of.iter().enumerate() {
            if let Some(c) = class {
                if *c >= school.num_classes() {
                    return Err(Error::ConstraintViolation {
                        kind: "unknown_class".into(),
                        details: format!(
                            "student {} assigned to class index {} of {}",
                            school.roster.student(i).id,
                            c,
                            school.num_classes()
                        ),
                    });
                }
                school.assign(i, *c);
            }
        }
        Ok(school)
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, c: usize) -> &str {
        &self.labels[c]
    }

    /// Class index for a class label.
    pub fn class_by_label(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn class_of(&self, i: usize) -> Option<usize> {
        self.class_of[i]
    }

    pub fn members(&self, c: usize) -> &[usize] {
        &self.members[c]
    }

    pub fn stats(&self, c: usize) -> &ClassStats {
        &self.stats[c]
    }

    pub fn assigned_count(&self) -> usize {
        self.class_of.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_fully_assigned(&self) -> bool {
        self.class_of.iter().all(|c| c.is_some())
    }

    /// Number of friends of `i` placed in the same class as `i`.
    pub fn placed_friends(&self, i: usize) -> usize {
        match self.class_of[i] {
            None => 0,
            Some(c) => self
                .roster
                .friends_of(i)
                .iter()
                .filter(|f| self.class_of[**f] == Some(c))
                .count(),
        }
    }

    /// Number of disliked peers of `i` placed in a different class.
    pub fn avoided_dislikes(&self, i: usize) -> usize {
        match self.class_of[i] {
            None => self.roster.dislikes_of(i).len(),
            Some(c) => self
                .roster
                .dislikes_of(i)
                .iter()
                .filter(|d| self.class_of[**d] != Some(c))
                .count(),
        }
    }

    /// Place an unassigned student into a class.
    ///
    /// This is a raw mutation primitive: it keeps the aggregates consistent
    /// but performs no constraint checking. Algorithms go through the
    /// checked operations in `ops` instead.
    pub fn assign(&mut self, i: usize, c: usize) {
        debug_assert!(self.class_of[i].is_none(), "student already assigned");
        self.class_of[i] = Some(c);
        self.members[c].push(i);
        let student = &self.roster.students[i];
        self.stats[c].add(student);
    }

    /// Remove a student from their class.
    pub fn unassign(&mut self, i: usize) {
        let c = self.class_of[i].expect("student not assigned");
        self.class_of[i] = None;
        let pos = self.members[c]
            .iter()
            .position(|m| *m == i)
            .expect("membership list out of sync");
        self.members[c].remove(pos);
        let student = &self.roster.students[i];
        self.stats[c].remove(student);
    }

    /// Move an assigned student to another class.
    pub fn transfer(&mut self, i: usize, to: usize) {
        self.unassign(i);
        self.assign(i, to);
    }

    /// Per-student class vector, suitable for `from_assignment`.
    pub fn assignment(&self) -> Vec<Option<usize>> {
        self.class_of.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{roster_from, student};

    #[test]
    fn peer_lists_are_cleaned() {
        let mut a = student(100000001, Gender::M);
        // duplicate, self-reference and a preference that is also disliked
        a.preferred_friends = vec![100000002, 100000002, 100000001, 100000003];
        a.disliked_peers = vec![100000003, 100000003];
        let b = student(100000002, Gender::F);
        let c = student(100000003, Gender::M);
        let roster = roster_from(vec![a, b, c]);
        assert_eq!(roster.student(0).preferred_friends, vec![100000002]);
        assert_eq!(roster.student(0).disliked_peers, vec![100000003]);
        assert_eq!(roster.friends_of(0), &[1]);
        assert_eq!(roster.dislikes_of(0), &[2]);
        assert_eq!(roster.fans_of(1), &[0]);
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let mut a = student(100000001, Gender::M);
        a.preferred_friends = vec![999999999];
        let result = Roster::new(vec![a], Vec::new(), Vec::new());
        assert!(matches!(
            result,
            Err(Error::DataReference {
                kind: "preferred_friends",
                id: 999999999
            })
        ));
    }

    #[test]
    fn force_groups_are_collected() {
        let mut a = student(100000001, Gender::M);
        a.force_group = Some("g1".into());
        let b = student(100000002, Gender::F);
        let mut c = student(100000003, Gender::M);
        c.force_group = Some("g1".into());
        let roster = roster_from(vec![a, b, c]);
        assert_eq!(roster.groups().len(), 1);
        assert_eq!(roster.groups()[0].members, vec![0, 2]);
        assert_eq!(roster.group_of(1), None);
        assert!(roster.is_locked(0));
        assert!(!roster.is_locked(1));
    }

    #[test]
    fn stats_follow_mutations() {
        let mut a = student(100000001, Gender::M);
        a.academic_score = 90.0;
        a.school_of_origin = "North".into();
        a.assistance_package = true;
        let mut b = student(100000002, Gender::F);
        b.academic_score = 70.0;
        b.school_of_origin = "North".into();
        let roster = Arc::new(roster_from(vec![a, b]));
        let mut school = School::empty(roster, vec!["1".into(), "2".into()]);

        school.assign(0, 0);
        school.assign(1, 0);
        assert_eq!(school.stats(0).size, 2);
        assert_eq!(school.stats(0).male, 1);
        assert_eq!(school.stats(0).female, 1);
        assert_eq!(school.stats(0).assistance, 1);
        assert_eq!(school.stats(0).origins.get("North"), Some(&2));
        assert_eq!(school.stats(0).mean_academic(), 80.0);

        school.transfer(1, 1);
        assert_eq!(school.stats(0).size, 1);
        assert_eq!(school.stats(0).origins.get("North"), Some(&1));
        assert_eq!(school.stats(1).mean_academic(), 70.0);
        assert_eq!(school.members(1), &[1]);

        school.unassign(0);
        assert_eq!(school.stats(0), &ClassStats::default());
    }

    #[test]
    fn from_assignment_round_trips() {
        let roster = Arc::new(roster_from(vec![
            student(100000001, Gender::M),
            student(100000002, Gender::F),
            student(100000003, Gender::M),
        ]));
        let labels = vec!["1".to_string(), "2".to_string()];
        let mut school = School::empty(roster.clone(), labels.clone());
        school.assign(0, 0);
        school.assign(1, 1);
        school.assign(2, 0);

        let rebuilt =
            School::from_assignment(roster, labels, school.assignment()).unwrap();
        assert_eq!(rebuilt, school);
        assert_eq!(rebuilt.stats(0).size, 2);
    }

    #[test]
    fn placed_friends_and_avoided_dislikes() {
        let mut a = student(100000001, Gender::M);
        a.preferred_friends = vec![100000002, 100000003];
        a.disliked_peers = vec![100000004];
        let roster = Arc::new(roster_from(vec![
            a,
            student(100000002, Gender::F),
            student(100000003, Gender::M),
            student(100000004, Gender::F),
        ]));
        let mut school = School::empty(roster, vec!["1".into(), "2".into()]);
        school.assign(0, 0);
        school.assign(1, 0);
        school.assign(2, 1);
        school.assign(3, 0);
        assert_eq!(school.placed_friends(0), 1);
        assert_eq!(school.avoided_dislikes(0), 0);
        school.transfer(3, 1);
        assert_eq!(school.avoided_dislikes(0), 1);
    }
}
