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

//! The three-layer scoring oracle.
//!
//! A score is a pure function of a snapshot and a configuration: no state,
//! no side effects, no randomness. All percentage metrics saturate at 0 and
//! 100, and every weighted combination normalizes its weights to sum to 1,
//! dropping zero-weighted metrics from the denominator.
//!
//! Per-student and per-class breakdowns are collected into `BTreeMap`s and
//! all aggregation iterates those maps, so the result is invariant under
//! reordering of the input students and classes.

use std::collections::BTreeMap;

use ndarray::Array1;
use serde::Serialize;

use crate::config::Config;
use crate::model::{School, StudentId};

#[derive(Debug, Clone, Serialize)]
pub struct StudentBreakdown {
    pub friend_satisfaction: f64,
    pub conflict_avoidance: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassBreakdown {
    pub size: usize,
    pub gender_balance: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchoolBreakdown {
    pub academic_balance: f64,
    pub behavior_balance: f64,
    pub studentiality_balance: f64,
    pub size_balance: f64,
    pub assistance_balance: f64,
    pub school_origin_balance: f64,
    pub score: f64,
}

/// Full decomposition of one evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreResult {
    pub final_score: f64,
    pub student_layer: f64,
    pub class_layer: f64,
    pub school_layer: f64,
    pub per_student: BTreeMap<StudentId, StudentBreakdown>,
    pub per_class: BTreeMap<String, ClassBreakdown>,
    pub school: SchoolBreakdown,
}

fn clamp(v: f64) -> f64 {
    v.max(0.0).min(100.0)
}

/// Weight-normalized mean; `None` when every weight is zero (the caller
/// then drops the whole aggregate from its own normalization).
fn weighted_mean(parts: &[(f64, f64)]) -> Option<f64> {
    let total: f64 = parts.iter().map(|(_, w)| w).sum();
    if total == 0.0 {
        return None;
    }
    Some(parts.iter().map(|(v, w)| v * w).sum::<f64>() / total)
}

/// Evaluate a snapshot. See the module docs for the guarantees.
pub fn score(school: &School, config: &Config) -> ScoreResult {
    let (student_layer, per_student) = student_layer(school, config);
    let (class_layer, per_class) = class_layer(school, config);
    let (school_layer, school_breakdown) = school_layer(school, config, &per_class);

    let layers = &config.weights.layers;
    let mut parts = Vec::with_capacity(3);
    if let Some(v) = student_layer {
        parts.push((v, layers.student));
    }
    if let Some(v) = class_layer {
        parts.push((v, layers.class));
    }
    if let Some(v) = school_layer {
        parts.push((v, layers.school));
    }
    let final_score = weighted_mean(&parts).unwrap_or(0.0);

    ScoreResult {
        final_score,
        student_layer: student_layer.unwrap_or(100.0),
        class_layer: class_layer.unwrap_or(100.0),
        school_layer: school_layer.unwrap_or(100.0),
        per_student,
        per_class,
        school: school_breakdown,
    }
}

/// Final score only; identical arithmetic to [`score`].
pub fn final_score(school: &School, config: &Config) -> f64 {
    score(school, config).final_score
}

fn student_layer(
    school: &School,
    config: &Config,
) -> (Option<f64>, BTreeMap<StudentId, StudentBreakdown>) {
    let weights = &config.weights.student_layer;
    let roster = school.roster();
    let mut per_student = BTreeMap::new();
    for student in roster.students() {
        let friends = roster.friends_of(student.index).len();
        let dislikes = roster.dislikes_of(student.index).len();
        let friend_satisfaction = if friends == 0 {
            100.0
        } else {
            clamp(100.0 * school.placed_friends(student.index) as f64 / friends as f64)
        };
        let conflict_avoidance = if dislikes == 0 {
            100.0
        } else {
            clamp(100.0 * school.avoided_dislikes(student.index) as f64 / dislikes as f64)
        };
        let score = weighted_mean(&[
            (friend_satisfaction, weights.friends),
            (conflict_avoidance, weights.dislikes),
        ])
        .unwrap_or(100.0);
        per_student.insert(
            student.id,
            StudentBreakdown {
                friend_satisfaction,
                conflict_avoidance,
                score,
            },
        );
    }

    if weights.friends + weights.dislikes == 0.0 {
        return (None, per_student);
    }
    let layer = if per_student.is_empty() {
        100.0
    } else {
        per_student.values().map(|b| b.score).sum::<f64>() / per_student.len() as f64
    };
    (Some(layer), per_student)
}

fn class_layer(
    school: &School,
    config: &Config,
) -> (Option<f64>, BTreeMap<String, ClassBreakdown>) {
    let weights = &config.weights.class_layer;
    let mut per_class = BTreeMap::new();
    for c in 0..school.num_classes() {
        let stats = school.stats(c);
        let gender_balance = if stats.size == 0 {
            100.0
        } else {
            let m = stats.male as f64 / stats.size as f64;
            let f = stats.female as f64 / stats.size as f64;
            clamp(100.0 - 100.0 * (m - f).abs())
        };
        // Kept as a weighted mean over a single metric so that further
        // class metrics can be added without changing the layer contract.
        let score =
            weighted_mean(&[(gender_balance, weights.gender_balance)]).unwrap_or(100.0);
        per_class.insert(
            school.label(c).to_string(),
            ClassBreakdown {
                size: stats.size,
                gender_balance,
                score,
            },
        );
    }

    if weights.gender_balance == 0.0 {
        return (None, per_class);
    }
    let layer = if per_class.is_empty() {
        100.0
    } else {
        per_class.values().map(|b| b.score).sum::<f64>() / per_class.len() as f64
    };
    (Some(layer), per_class)
}

/// `max(0, 100 − σ(v)·factor)` with population σ; short vectors score 100.
fn spread_score(values: &Array1<f64>, factor: f64) -> f64 {
    if values.len() <= 1 {
        return 100.0;
    }
    clamp(100.0 - values.std(0.0) * factor)
}

fn school_layer(
    school: &School,
    config: &Config,
    per_class: &BTreeMap<String, ClassBreakdown>,
) -> (Option<f64>, SchoolBreakdown) {
    let weights = &config.weights.school_layer;
    let norm = &config.normalization;

    // Metric vectors are ordered by class label so the result does not
    // depend on class enumeration order.
    let class_indices: Vec<usize> = per_class
        .keys()
        .map(|label| school.class_by_label(label).expect("breakdown label"))
        .collect();
    let vector = |f: &dyn Fn(usize) -> f64| -> Array1<f64> {
        class_indices.iter().map(|c| f(*c)).collect()
    };

    let academic_balance = spread_score(
        &vector(&|c| school.stats(c).mean_academic()),
        norm.academic_score_factor,
    );
    let behavior_balance = spread_score(
        &vector(&|c| school.stats(c).mean_behavior()),
        norm.behavior_rank_factor,
    );
    let studentiality_balance = spread_score(
        &vector(&|c| school.stats(c).mean_studentiality()),
        norm.studentiality_rank_factor,
    );
    let size_balance = spread_score(
        &vector(&|c| school.stats(c).size as f64),
        norm.class_size_factor,
    );
    let assistance_balance = spread_score(
        &vector(&|c| school.stats(c).assistance as f64),
        norm.assistance_count_factor,
    );
    let school_origin_balance = origin_balance(school, &class_indices);

    let parts = [
        (academic_balance, weights.academic_balance),
        (behavior_balance, weights.behavior_balance),
        (studentiality_balance, weights.studentiality_balance),
        (size_balance, weights.size_balance),
        (assistance_balance, weights.assistance_balance),
        (school_origin_balance, weights.school_origin_balance),
    ];
    let layer = weighted_mean(&parts);

    let breakdown = SchoolBreakdown {
        academic_balance,
        behavior_balance,
        studentiality_balance,
        size_balance,
        assistance_balance,
        school_origin_balance,
        score: layer.unwrap_or(100.0),
    };
    (layer, breakdown)
}

/// School-of-origin balance: 0.7·representation + 0.3·non-dominance.
///
/// Representation grades how widely each origin is spread over the classes
/// against a target presence that grows with the origin's size;
/// non-dominance penalizes classes in which a single origin holds more than
/// 60% of the seats. Empty origins are ignored throughout.
fn origin_balance(school: &School, class_indices: &[usize]) -> f64 {
    let k = class_indices.len();
    if k == 0 {
        return 100.0;
    }

    // Origin sizes over the whole roster (empty string excluded)
    let mut origin_sizes: BTreeMap<&str, usize> = BTreeMap::new();
    for student in school.roster().students() {
        if !student.school_of_origin.is_empty() {
            *origin_sizes.entry(student.school_of_origin.as_str()).or_insert(0) += 1;
        }
    }

    let representation = if origin_sizes.is_empty() {
        100.0
    } else {
        let mut sum = 0.0;
        for (origin, n) in &origin_sizes {
            let target = if *n > 40 {
                0.8
            } else if *n >= 20 {
                0.6
            } else {
                0.4
            };
            let present = class_indices
                .iter()
                .filter(|c| school.stats(**c).origins.contains_key(*origin))
                .count();
            let presence = present as f64 / k as f64;
            sum += 100.0 * (presence / target).min(1.0);
        }
        sum / origin_sizes.len() as f64
    };

    let populated: Vec<usize> = class_indices
        .iter()
        .copied()
        .filter(|c| school.stats(*c).size > 0)
        .collect();
    let non_dominance = if populated.is_empty() {
        100.0
    } else {
        populated
            .iter()
            .map(|c| {
                let dominance = school.stats(*c).dominant_origin_share();
                100.0 * ((0.6 - dominance) / 0.6).max(0.0).min(1.0)
            })
            .sum::<f64>()
            / populated.len() as f64
    };

    clamp(0.7 * representation + 0.3 * non_dominance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Gender;
    use crate::test::{school_round_robin, student};
    use assert_float_eq::assert_float_absolute_eq;

    #[test]
    fn mutual_friends_in_one_class_score_perfectly() {
        let mut a = student(101000001, Gender::M);
        a.academic_score = 90.0;
        a.preferred_friends = vec![101000002];
        let mut b = student(101000002, Gender::F);
        b.academic_score = 80.0;
        b.preferred_friends = vec![101000001];
        let school = school_round_robin(vec![a, b], 1);

        let result = score(&school, &Config::default());
        assert_float_absolute_eq!(result.student_layer, 100.0);
        assert_float_absolute_eq!(result.class_layer, 100.0);
        assert_float_absolute_eq!(result.school_layer, 100.0);
        assert_float_absolute_eq!(result.final_score, 100.0);
        let breakdown = &result.per_student[&101000001];
        assert_float_absolute_eq!(breakdown.friend_satisfaction, 100.0);
        assert_float_absolute_eq!(breakdown.conflict_avoidance, 100.0);
    }

    #[test]
    fn uneven_sizes_and_single_gender_classes_are_penalized() {
        // class "1": 200000001, 200000003; class "2": 200000002 after the
        // transfer below — matching the {1,2},{3} split of the scenario.
        let mut a = student(200000001, Gender::M);
        a.preferred_friends = vec![200000002];
        let b = student(200000002, Gender::M);
        let mut c = student(200000003, Gender::M);
        c.disliked_peers = vec![200000001];
        let mut school = school_round_robin(vec![a, b, c], 2);
        school.transfer(1, 0); // class 0: a, b — class 1: c

        let mut config = Config::default();
        // size balance participates with weight 0.125 so the size spread
        // (σ=0.5, factor 5 → 97.5) shows up in the school layer
        config.weights.school_layer.size_balance = 0.125;

        let result = score(&school, &config);
        assert_float_absolute_eq!(result.student_layer, 100.0);
        assert_float_absolute_eq!(result.class_layer, 0.0);
        assert_float_absolute_eq!(result.school.size_balance, 97.5);
        assert_float_absolute_eq!(result.school_layer, 99.7222, 1e-3);
        assert_float_absolute_eq!(result.final_score, 94.944, 1e-2);
        assert_float_absolute_eq!(
            result.per_student[&200000003].conflict_avoidance,
            100.0
        );
    }

    #[test]
    fn scoring_is_deterministic_and_order_invariant() {
        let build = |order: &[usize]| {
            let mut students = Vec::new();
            for &i in order {
                let mut s = student(300000001 + i as u32, if i % 2 == 0 { Gender::M } else { Gender::F });
                s.academic_score = 60.0 + i as f64;
                s.school_of_origin = format!("Origin{}", i % 3);
                if i > 0 {
                    s.preferred_friends = vec![300000001];
                }
                students.push(s);
            }
            students
        };
        let forward = school_round_robin(build(&[0, 1, 2, 3, 4, 5]), 3);
        let config = Config::default();
        let a = score(&forward, &config);
        let b = score(&forward, &config);
        assert_eq!(a.final_score, b.final_score);

        // same students in reverse roster order, same class composition:
        // student i sat in class i % 3; reversed list gets explicit classes
        let students = build(&[5, 4, 3, 2, 1, 0]);
        let roster = std::sync::Arc::new(crate::test::roster_from(students));
        let labels = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let mut reversed = crate::model::School::empty(roster, labels);
        for pos in 0..6 {
            let original_index = 5 - pos;
            reversed.assign(pos, original_index % 3);
        }
        let c = score(&reversed, &config);
        assert_eq!(a.final_score, c.final_score);
        assert_eq!(a.student_layer, c.student_layer);
        assert_eq!(a.class_layer, c.class_layer);
        assert_eq!(a.school_layer, c.school_layer);
    }

    #[test]
    fn all_zero_sub_weights_collapse_a_layer() {
        let school = school_round_robin(
            vec![
                student(400000001, Gender::M),
                student(400000002, Gender::M),
            ],
            1,
        );
        let mut config = Config::default();
        config.weights.class_layer.gender_balance = 0.0;

        // the all-male class would score 0 on gender balance, but the layer
        // is disabled and must not drag the final score down
        let result = score(&school, &config);
        assert_float_absolute_eq!(result.final_score, 100.0);
        assert_float_absolute_eq!(result.per_class["1"].gender_balance, 0.0);
    }

    #[test]
    fn empty_class_is_neutral() {
        let mut a = student(500000001, Gender::M);
        a.school_of_origin = "North".into();
        let mut b = student(500000002, Gender::M);
        b.school_of_origin = "North".into();
        let roster = std::sync::Arc::new(crate::test::roster_from(vec![a, b]));
        let mut school =
            crate::model::School::empty(roster, vec!["1".into(), "2".into()]);
        school.assign(0, 0);
        school.assign(1, 0);

        let mut config = Config::default();
        config.weights.school_layer.school_origin_balance = 1.0;
        let result = score(&school, &config);
        assert_float_absolute_eq!(result.per_class["2"].gender_balance, 100.0);
        // dominance only over the populated class: share 1.0 → 0, spread
        // over a single populated class; representation p=0.5, t=0.4 → 100
        assert_float_absolute_eq!(result.school.school_origin_balance, 70.0);
    }

    #[test]
    fn empty_origin_is_ignored() {
        let a = student(600000001, Gender::M); // no origin
        let b = student(600000002, Gender::F);
        let school = school_round_robin(vec![a, b], 1);
        let mut config = Config::default();
        config.weights.school_layer.school_origin_balance = 1.0;
        let result = score(&school, &config);
        // no origin data at all: representation neutral, dominance 0
        assert_float_absolute_eq!(result.school.school_origin_balance, 100.0);
    }
}
