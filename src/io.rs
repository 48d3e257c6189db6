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

//! IO functionality: tabular import/export and run-directory reports.

pub mod report;
pub mod table;

use std::fmt::Write;

use crate::model::School;
use crate::scoring::ScoreResult;

/// Format an assignment into a human readable String (e.g. to print it to
/// stdout).
///
/// The output format will look like
/// ```text
/// ===== Class 1 =====
/// (3 students, 2 M / 1 F, mean academic 72.3)
/// - Dana Cohen
/// - Omer Levi [assist]
/// …
/// ```
pub fn format_assignment(school: &School, scores: Option<&ScoreResult>) -> String {
    let mut result = String::new();
    for c in 0..school.num_classes() {
        let stats = school.stats(c);
        write!(result, "\n===== Class {} =====\n", school.label(c)).unwrap();
        writeln!(
            result,
            "({} students, {} M / {} F, mean academic {:.1})",
            stats.size,
            stats.male,
            stats.female,
            stats.mean_academic()
        )
        .unwrap();
        if let Some(scores) = scores {
            if let Some(breakdown) = scores.per_class.get(school.label(c)) {
                writeln!(
                    result,
                    "(class score {:.1}, gender balance {:.1})",
                    breakdown.score, breakdown.gender_balance
                )
                .unwrap();
            }
        }
        for &m in school.members(c) {
            let student = school.roster().student(m);
            writeln!(
                result,
                "- {}{}",
                student.full_name(),
                if student.assistance_package {
                    " [assist]"
                } else {
                    ""
                }
            )
            .unwrap();
        }
    }

    let unassigned: Vec<usize> = (0..school.roster().len())
        .filter(|i| school.class_of(*i).is_none())
        .collect();
    if !unassigned.is_empty() {
        write!(result, "\n===== Unassigned =====\n").unwrap();
        for i in unassigned {
            writeln!(result, "- {}", school.roster().student(i).full_name()).unwrap();
        }
    }

    result
}

/// Assert that an imported snapshot is internally consistent (indexes,
/// cross references, aggregate counters). Only called in debug builds
/// after import.
pub fn assert_data_consistency(school: &School) {
    let roster = school.roster();
    for (i, s) in roster.students().iter().enumerate() {
        assert_eq!(i, s.index, "index of {}. student is {}", i, s.index);
        for &f in roster.friends_of(i) {
            assert!(
                f < roster.len(),
                "friend edge {} of {}. student is invalid",
                f,
                i
            );
        }
        for &d in roster.dislikes_of(i) {
            assert!(
                d < roster.len(),
                "dislike edge {} of {}. student is invalid",
                d,
                i
            );
        }
        if let Some(c) = s.force_class {
            assert!(
                c < school.num_classes(),
                "force class of {} is invalid",
                s.id
            );
        }
    }
    let mut seen = 0;
    for c in 0..school.num_classes() {
        assert_eq!(
            school.members(c).len(),
            school.stats(c).size,
            "size counter of class {} is out of sync",
            school.label(c)
        );
        for &m in school.members(c) {
            assert_eq!(
                school.class_of(m),
                Some(c),
                "membership of student {} is out of sync",
                roster.student(m).id
            );
            seen += 1;
        }
    }
    assert_eq!(seen, school.assigned_count());
}
