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

//! Reference-baseline generation: repeated seeded random-swap runs.
//!
//! The distribution of final scores over N independent runs of the
//! reference algorithm is the yardstick for judging the other algorithms:
//! a candidate result can be placed into the distribution with
//! [`BaselineResult::percentile_rank`].

use std::fmt;

use log::debug;
use serde::Serialize;

use crate::algorithms::{Algorithm, CancelToken, RunContext};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::School;
use crate::progress::{LogLevel, ProgressCallback};

pub const DEFAULT_NUM_RUNS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct BaselineRun {
    pub seed: u64,
    pub initial_score: f64,
    pub final_score: f64,
    pub improvement: f64,
    pub duration_seconds: f64,
    pub iterations_used: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BaselineResult {
    pub runs: Vec<BaselineRun>,
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation of the final scores
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl BaselineResult {
    /// Percentile rank of `score` within the collected final scores, in
    /// [0, 100]. Scores tied with `score` count half.
    pub fn percentile_rank(&self, score: f64) -> f64 {
        if self.runs.is_empty() {
            return 0.0;
        }
        let below = self
            .runs
            .iter()
            .filter(|r| r.final_score < score)
            .count() as f64;
        let tied = self
            .runs
            .iter()
            .filter(|r| r.final_score == score)
            .count() as f64;
        100.0 * (below + 0.5 * tied) / self.runs.len() as f64
    }
}

impl fmt::Display for BaselineResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Baseline statistics over {} runs:
Mean final score:   {: >10.4}
Median final score: {: >10.4}
Std deviation:      {: >10.4}
Min / Max:          {: >10.4} / {: >10.4}\n",
            self.runs.len(),
            self.mean,
            self.median,
            self.std_dev,
            self.min,
            self.max,
        )
    }
}

/// Run the reference algorithm `num_runs` times over the same starting
/// snapshot with distinct seeds and collect the score distribution.
///
/// Seeds count up from `base_seed` unless an explicit `seeds` list is
/// given; the list's length then overrides `num_runs`. Cancellation stops
/// the collection; statistics cover the finished runs if at least one
/// completed.
pub fn generate(
    school: &School,
    config: &Config,
    num_runs: usize,
    base_seed: u64,
    seeds: Option<Vec<u64>>,
    level: LogLevel,
    callback: Option<ProgressCallback>,
    cancel: CancelToken,
) -> Result<BaselineResult> {
    let seeds: Vec<u64> = match seeds {
        Some(seeds) => seeds,
        None => (0..num_runs as u64).map(|i| base_seed + i).collect(),
    };
    if seeds.is_empty() {
        return Err(Error::InvalidConfig {
            key: "num_runs".to_string(),
            reason: "at least one baseline run is required".to_string(),
        });
    }

    let mut runs = Vec::with_capacity(seeds.len());
    for seed in seeds {
        if cancel.is_cancelled() {
            if runs.is_empty() {
                return Err(Error::Cancelled);
            }
            break;
        }
        let ctx = RunContext {
            config,
            cancel: cancel.clone(),
            deadline: None,
            level,
            callback: callback.clone(),
        };
        let result = Algorithm::RandomSwap.run(school, seed, &ctx)?;
        debug!(
            "baseline run seed {}: {:.4} -> {:.4} in {} iterations",
            seed,
            result.initial_score,
            result.best_score,
            result.iterations_used
        );
        runs.push(BaselineRun {
            seed,
            initial_score: result.initial_score,
            final_score: result.best_score,
            improvement: result.improvement(),
            duration_seconds: result.elapsed.as_secs_f64(),
            iterations_used: result.iterations_used,
        });
    }

    Ok(summarize(runs))
}

fn summarize(runs: Vec<BaselineRun>) -> BaselineResult {
    let mut finals: Vec<f64> = runs.iter().map(|r| r.final_score).collect();
    finals.sort_by(|a, b| a.partial_cmp(b).expect("no NaN scores"));
    let n = finals.len() as f64;

    let mean = finals.iter().sum::<f64>() / n;
    let median = if finals.len() % 2 == 1 {
        finals[finals.len() / 2]
    } else {
        (finals[finals.len() / 2 - 1] + finals[finals.len() / 2]) / 2.0
    };
    let variance = finals.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

    BaselineResult {
        mean,
        median,
        std_dev: variance.sqrt(),
        min: finals[0],
        max: finals[finals.len() - 1],
        runs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Gender;
    use crate::test::{school_round_robin, student};

    fn school() -> School {
        let mut students = Vec::new();
        for pair in 0..3u32 {
            let a_id = 760000001 + pair * 2;
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

    fn config() -> Config {
        let mut config = Config::default();
        config.constraints.minimum_friends = 0;
        config.optimization.max_iterations = 100;
        config
    }

    #[test]
    fn statistics_are_consistent() {
        let result = generate(
            &school(),
            &config(),
            5,
            1000,
            None,
            LogLevel::Minimal,
            None,
            CancelToken::new(),
        )
        .unwrap();
        assert_eq!(result.runs.len(), 5);
        assert!(result.min <= result.mean && result.mean <= result.max);
        assert!(result.std_dev >= 0.0);
        assert!(result.min <= result.median && result.median <= result.max);
    }

    #[test]
    fn same_base_seed_reproduces_every_run() {
        let school = school();
        let config = config();
        let a = generate(
            &school,
            &config,
            5,
            42,
            None,
            LogLevel::Minimal,
            None,
            CancelToken::new(),
        )
        .unwrap();
        let b = generate(
            &school,
            &config,
            5,
            42,
            None,
            LogLevel::Minimal,
            None,
            CancelToken::new(),
        )
        .unwrap();
        for (x, y) in a.runs.iter().zip(&b.runs) {
            assert_eq!(x.final_score, y.final_score);
            assert_eq!(x.iterations_used, y.iterations_used);
        }
        assert_eq!(a.mean, b.mean);
        assert_eq!(a.median, b.median);
        assert_eq!(a.std_dev, b.std_dev);
    }

    #[test]
    fn explicit_seed_list_overrides_num_runs() {
        let result = generate(
            &school(),
            &config(),
            10,
            0,
            Some(vec![7, 8]),
            LogLevel::Minimal,
            None,
            CancelToken::new(),
        )
        .unwrap();
        assert_eq!(result.runs.len(), 2);
        assert_eq!(result.runs[0].seed, 7);
    }

    #[test]
    fn percentile_rank_brackets_the_distribution() {
        let result = generate(
            &school(),
            &config(),
            6,
            3,
            None,
            LogLevel::Minimal,
            None,
            CancelToken::new(),
        )
        .unwrap();
        assert_eq!(result.percentile_rank(result.max + 1.0), 100.0);
        assert_eq!(result.percentile_rank(result.min - 1.0), 0.0);
        let mid = result.percentile_rank(result.median);
        assert!(mid > 0.0 && mid < 100.0);
    }
}
