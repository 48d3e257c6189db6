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

//! Shared fixtures for the unit test suites.

use std::sync::Arc;

use crate::model::{Gender, Rank, Roster, School, Student};

/// A plain student with neutral attribute values.
pub fn student(id: u32, gender: Gender) -> Student {
    Student {
        index: 0,
        id,
        first_name: format!("Student{}", id),
        last_name: "Test".to_string(),
        gender,
        academic_score: 50.0,
        behavior_rank: Rank::A,
        studentiality_rank: Rank::A,
        assistance_package: false,
        school_of_origin: String::new(),
        preferred_friends: Vec::new(),
        disliked_peers: Vec::new(),
        force_class: None,
        force_group: None,
    }
}

pub fn roster_from(students: Vec<Student>) -> Roster {
    Roster::new(students, Vec::new(), Vec::new()).expect("fixture roster must be valid")
}

/// A fully assigned school with `k` classes labelled "1".."k"; students are
/// dealt round-robin in roster order.
pub fn school_round_robin(students: Vec<Student>, k: usize) -> School {
    let roster = Arc::new(roster_from(students));
    let labels = (1..=k).map(|c| c.to_string()).collect();
    let mut school = School::empty(roster, labels);
    for i in 0..school.roster().len() {
        school.assign(i, i % k);
    }
    school
}
