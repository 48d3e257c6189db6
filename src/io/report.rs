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

//! Run-directory artifacts.
//!
//! Every CLI invocation that produces results materializes them in a fresh
//! directory named `{operation}_{input_stem}_{algorithm_or_strategy}_{timestamp}`:
//! the assignment table, the full score decomposition, per-student and
//! per-class breakdown tables, the configuration snapshot and a short
//! `operation_info.txt` summary.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::info;

use crate::config::Config;
use crate::error::Result;
use crate::io::table;
use crate::model::School;
use crate::scoring::ScoreResult;

/// Summary facts for `operation_info.txt`.
pub struct RunInfo {
    pub operation: String,
    pub input_path: PathBuf,
    pub algorithm_or_strategy: String,
    pub initial_score: f64,
    pub final_score: f64,
    pub duration_seconds: f64,
    pub iterations: usize,
    pub constraints_satisfied: bool,
}

/// Create the artifact directory next to the working directory.
pub fn create_run_dir(
    operation: &str,
    input_path: &Path,
    algorithm_or_strategy: &str,
) -> Result<PathBuf> {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let dir = PathBuf::from(format!(
        "{}_{}_{}_{}",
        operation, stem, algorithm_or_strategy, timestamp
    ));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Write the full artifact set for one finished operation.
pub fn write_artifacts(
    dir: &Path,
    school: &School,
    scores: &ScoreResult,
    config: &Config,
    run_info: &RunInfo,
) -> Result<()> {
    table::write_path(dir.join("assignment.csv"), school)?;
    serde_json::to_writer_pretty(File::create(dir.join("scores.json"))?, scores)?;
    write_student_breakdowns(&dir.join("students.csv"), school, scores)?;
    write_class_breakdowns(&dir.join("classes.csv"), school, scores)?;
    config.save(dir.join("config.json"))?;
    write_operation_info(&dir.join("operation_info.txt"), run_info)?;
    info!("run artifacts written to {}", dir.display());
    Ok(())
}

fn write_student_breakdowns(
    path: &Path,
    school: &School,
    scores: &ScoreResult,
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    writer.write_record(&[
        "student_id",
        "name",
        "class",
        "friend_satisfaction",
        "conflict_avoidance",
        "score",
    ])?;
    for (id, breakdown) in &scores.per_student {
        let index = school
            .roster()
            .index_of(*id)
            .expect("breakdown id comes from the roster");
        let student = school.roster().student(index);
        writer.write_record(&[
            id.to_string(),
            student.full_name(),
            school
                .class_of(index)
                .map(|c| school.label(c).to_string())
                .unwrap_or_default(),
            format!("{:.2}", breakdown.friend_satisfaction),
            format!("{:.2}", breakdown.conflict_avoidance),
            format!("{:.2}", breakdown.score),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_class_breakdowns(path: &Path, school: &School, scores: &ScoreResult) -> Result<()> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    writer.write_record(&[
        "class",
        "size",
        "male",
        "female",
        "mean_academic",
        "mean_behavior",
        "assistance",
        "gender_balance",
        "score",
    ])?;
    for (label, breakdown) in &scores.per_class {
        let c = school.class_by_label(label).expect("breakdown label");
        let stats = school.stats(c);
        writer.write_record(&[
            label.clone(),
            stats.size.to_string(),
            stats.male.to_string(),
            stats.female.to_string(),
            format!("{:.2}", stats.mean_academic()),
            format!("{:.2}", stats.mean_behavior()),
            stats.assistance.to_string(),
            format!("{:.2}", breakdown.gender_balance),
            format!("{:.2}", breakdown.score),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_operation_info(path: &Path, run_info: &RunInfo) -> Result<()> {
    let mut file = File::create(path)?;
    write!(
        file,
        "operation:             {}
input:                 {}
algorithm/strategy:    {}
initial score:         {:.4}
final score:           {:.4}
duration:              {:.3}s
iterations:            {}
constraints satisfied: {}\n",
        run_info.operation,
        run_info.input_path.display(),
        run_info.algorithm_or_strategy,
        run_info.initial_score,
        run_info.final_score,
        run_info.duration_seconds,
        run_info.iterations,
        run_info.constraints_satisfied,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Gender;
    use crate::scoring;
    use crate::test::{school_round_robin, student};

    #[test]
    fn artifact_set_is_complete() {
        let school = school_round_robin(
            vec![
                student(800000001, Gender::M),
                student(800000002, Gender::F),
            ],
            1,
        );
        let config = Config::default();
        let scores = scoring::score(&school, &config);
        let dir = tempfile::tempdir().unwrap();

        let run_info = RunInfo {
            operation: "optimize".to_string(),
            input_path: PathBuf::from("roster.csv"),
            algorithm_or_strategy: "best_of".to_string(),
            initial_score: 90.0,
            final_score: scores.final_score,
            duration_seconds: 0.5,
            iterations: 17,
            constraints_satisfied: true,
        };
        write_artifacts(dir.path(), &school, &scores, &config, &run_info).unwrap();

        for file in [
            "assignment.csv",
            "scores.json",
            "students.csv",
            "classes.csv",
            "config.json",
            "operation_info.txt",
        ] {
            assert!(dir.path().join(file).exists(), "missing {}", file);
        }
        let info = std::fs::read_to_string(dir.path().join("operation_info.txt")).unwrap();
        assert!(info.contains("operation:             optimize"));
        assert!(info.contains("constraints satisfied: true"));
    }

    #[test]
    fn run_dir_name_carries_the_context() {
        let dir = create_run_dir(
            "score",
            Path::new("rosters/grade7.csv"),
            "single",
        )
        .unwrap();
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("score_grade7_single_"));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
