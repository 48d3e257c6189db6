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

//! The structured configuration document.
//!
//! The whole tree is serde-backed and persisted as JSON. Every node carries
//! defaults, so a partial document (or none at all) always yields a complete
//! configuration. Unknown keys are rejected so that typos surface as
//! `config.invalid` errors instead of silently falling back to defaults.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Default file name used by the CLI when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "classplan.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub weights: Weights,
    pub normalization: Normalization,
    pub class_config: ClassConfig,
    pub constraints: Constraints,
    pub optimization: Optimization,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Weights {
    pub layers: LayerWeights,
    pub student_layer: StudentLayerWeights,
    pub class_layer: ClassLayerWeights,
    pub school_layer: SchoolLayerWeights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayerWeights {
    pub student: f64,
    pub class: f64,
    pub school: f64,
}

impl Default for LayerWeights {
    fn default() -> Self {
        LayerWeights {
            student: 0.75,
            class: 0.05,
            school: 0.20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StudentLayerWeights {
    pub friends: f64,
    pub dislikes: f64,
}

impl Default for StudentLayerWeights {
    fn default() -> Self {
        StudentLayerWeights {
            friends: 0.7,
            dislikes: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassLayerWeights {
    pub gender_balance: f64,
}

impl Default for ClassLayerWeights {
    fn default() -> Self {
        ClassLayerWeights {
            gender_balance: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchoolLayerWeights {
    pub academic_balance: f64,
    pub behavior_balance: f64,
    pub studentiality_balance: f64,
    pub size_balance: f64,
    pub assistance_balance: f64,
    pub school_origin_balance: f64,
}

impl Default for SchoolLayerWeights {
    fn default() -> Self {
        SchoolLayerWeights {
            academic_balance: 0.05,
            behavior_balance: 0.4,
            studentiality_balance: 0.4,
            size_balance: 0.0,
            assistance_balance: 0.15,
            school_origin_balance: 0.0,
        }
    }
}

/// σ-to-penalty multipliers for the school-layer balance metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Normalization {
    pub academic_score_factor: f64,
    pub behavior_rank_factor: f64,
    pub studentiality_rank_factor: f64,
    pub class_size_factor: f64,
    pub assistance_count_factor: f64,
    /// Part of the documented configuration surface, but not consumed by
    /// the scorer: school-origin balance is computed from representation
    /// and dominance ratios, not from a σ-based spread.
    pub school_origin_factor: f64,
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization {
            academic_score_factor: 2.0,
            behavior_rank_factor: 35.0,
            studentiality_rank_factor: 35.0,
            class_size_factor: 5.0,
            assistance_count_factor: 10.0,
            school_origin_factor: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassConfig {
    /// Number of classes to create; derived from the roster size when absent.
    pub target_classes: Option<usize>,
    pub min_class_size: usize,
    pub max_class_size: usize,
    pub preferred_class_size: usize,
    pub allow_uneven_classes: bool,
}

impl Default for ClassConfig {
    fn default() -> Self {
        ClassConfig {
            target_classes: None,
            min_class_size: 15,
            max_class_size: 30,
            preferred_class_size: 25,
            allow_uneven_classes: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Constraints {
    /// Hard minimum-friends threshold m; 0 disables the constraint.
    pub minimum_friends: usize,
    pub respect_force_constraints: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            minimum_friends: 1,
            respect_force_constraints: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Optimization {
    pub max_iterations: usize,
    /// Consecutive non-improving iterations before an algorithm early-stops.
    pub early_stop_threshold: usize,
    pub accept_neutral_moves: bool,
    /// Consecutive constraint-rejected proposals before a run is `stuck`.
    pub max_swap_attempts: usize,
    pub algorithms: AlgorithmKnobs,
}

impl Default for Optimization {
    fn default() -> Self {
        Optimization {
            max_iterations: 1000,
            early_stop_threshold: 100,
            accept_neutral_moves: false,
            max_swap_attempts: 100,
            algorithms: AlgorithmKnobs::default(),
        }
    }
}

/// Per-algorithm tuning knobs, shared by all algorithm instances of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlgorithmKnobs {
    // evolutionary
    pub population_size: usize,
    pub generations: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub elite_size: usize,
    pub tournament_size: usize,
    pub stagnation_limit: usize,
    // simulated annealing
    pub initial_temperature: f64,
    pub cooling_rate: f64,
    pub min_temperature: f64,
    /// Steps without improvement before reheating; absent disables reheat.
    pub reheat_threshold: Option<usize>,
    // local search
    pub max_passes: usize,
    pub min_improvement: f64,
}

impl Default for AlgorithmKnobs {
    fn default() -> Self {
        AlgorithmKnobs {
            population_size: 20,
            generations: 50,
            mutation_rate: 0.2,
            crossover_rate: 0.8,
            elite_size: 2,
            tournament_size: 3,
            stagnation_limit: 15,
            initial_temperature: 100.0,
            cooling_rate: 0.95,
            min_temperature: 0.001,
            reheat_threshold: None,
            max_passes: 10,
            min_improvement: 0.01,
        }
    }
}

impl Config {
    /// Read a configuration document from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let file = File::open(path.as_ref())?;
        let config: Config =
            serde_json::from_reader(file).map_err(|e| Error::InvalidConfig {
                key: path.as_ref().display().to_string(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Config> {
        if path.as_ref().exists() {
            Config::load(path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Set a single value by dotted key path, e.g.
    /// `weights.layers.student = 0.5`. The value string is interpreted as
    /// JSON where possible and as a bare string otherwise.
    pub fn set_key(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut tree = serde_json::to_value(&*self)?;
        let mut node = &mut tree;
        for part in key.split('.') {
            node = node
                .as_object_mut()
                .and_then(|map| map.get_mut(part))
                .ok_or_else(|| Error::InvalidConfig {
                    key: key.to_string(),
                    reason: "unknown key".to_string(),
                })?;
        }
        if node.is_object() {
            return Err(Error::InvalidConfig {
                key: key.to_string(),
                reason: "key names a section, not a value".to_string(),
            });
        }
        *node = serde_json::from_str(raw).unwrap_or(Value::String(raw.to_string()));
        let updated: Config =
            serde_json::from_value(tree).map_err(|e| Error::InvalidConfig {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Dotted keys whose values differ from the defaults, with current and
    /// default rendering. Used by `config status`.
    pub fn diff_from_default(&self) -> Vec<(String, String, String)> {
        let current = serde_json::to_value(self).expect("config serializes");
        let default = serde_json::to_value(Config::default()).expect("config serializes");
        let mut diffs = Vec::new();
        collect_diffs(String::new(), &current, &default, &mut diffs);
        diffs
    }

    /// Enforce value ranges and cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        let nonneg = |key: &str, v: f64| -> Result<()> {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidConfig {
                    key: key.to_string(),
                    reason: format!("must be a non-negative finite number, got {}", v),
                })
            }
        };
        let w = &self.weights;
        nonneg("weights.layers.student", w.layers.student)?;
        nonneg("weights.layers.class", w.layers.class)?;
        nonneg("weights.layers.school", w.layers.school)?;
        if w.layers.student + w.layers.class + w.layers.school == 0.0 {
            return Err(Error::InvalidConfig {
                key: "weights.layers".to_string(),
                reason: "all layer weights are zero".to_string(),
            });
        }
        nonneg("weights.student_layer.friends", w.student_layer.friends)?;
        nonneg("weights.student_layer.dislikes", w.student_layer.dislikes)?;
        nonneg(
            "weights.class_layer.gender_balance",
            w.class_layer.gender_balance,
        )?;
        nonneg(
            "weights.school_layer.academic_balance",
            w.school_layer.academic_balance,
        )?;
        nonneg(
            "weights.school_layer.behavior_balance",
            w.school_layer.behavior_balance,
        )?;
        nonneg(
            "weights.school_layer.studentiality_balance",
            w.school_layer.studentiality_balance,
        )?;
        nonneg("weights.school_layer.size_balance", w.school_layer.size_balance)?;
        nonneg(
            "weights.school_layer.assistance_balance",
            w.school_layer.assistance_balance,
        )?;
        nonneg(
            "weights.school_layer.school_origin_balance",
            w.school_layer.school_origin_balance,
        )?;

        let n = &self.normalization;
        nonneg("normalization.academic_score_factor", n.academic_score_factor)?;
        nonneg("normalization.behavior_rank_factor", n.behavior_rank_factor)?;
        nonneg(
            "normalization.studentiality_rank_factor",
            n.studentiality_rank_factor,
        )?;
        nonneg("normalization.class_size_factor", n.class_size_factor)?;
        nonneg(
            "normalization.assistance_count_factor",
            n.assistance_count_factor,
        )?;
        nonneg("normalization.school_origin_factor", n.school_origin_factor)?;

        let c = &self.class_config;
        if c.max_class_size == 0 {
            return Err(Error::InvalidConfig {
                key: "class_config.max_class_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if c.min_class_size > c.max_class_size {
            return Err(Error::InvalidConfig {
                key: "class_config.min_class_size".to_string(),
                reason: format!(
                    "must not exceed max_class_size ({} > {})",
                    c.min_class_size, c.max_class_size
                ),
            });
        }
        if let Some(k) = c.target_classes {
            if k == 0 {
                return Err(Error::InvalidConfig {
                    key: "class_config.target_classes".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        let o = &self.optimization;
        let a = &o.algorithms;
        if a.cooling_rate <= 0.0 || a.cooling_rate >= 1.0 {
            return Err(Error::InvalidConfig {
                key: "optimization.algorithms.cooling_rate".to_string(),
                reason: format!("must be in (0, 1), got {}", a.cooling_rate),
            });
        }
        if a.initial_temperature <= 0.0 {
            return Err(Error::InvalidConfig {
                key: "optimization.algorithms.initial_temperature".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        for (key, rate) in [
            ("optimization.algorithms.mutation_rate", a.mutation_rate),
            ("optimization.algorithms.crossover_rate", a.crossover_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::InvalidConfig {
                    key: key.to_string(),
                    reason: format!("must be in [0, 1], got {}", rate),
                });
            }
        }
        if a.population_size < 2 {
            return Err(Error::InvalidConfig {
                key: "optimization.algorithms.population_size".to_string(),
                reason: "must be at least 2".to_string(),
            });
        }
        if a.elite_size >= a.population_size {
            return Err(Error::InvalidConfig {
                key: "optimization.algorithms.elite_size".to_string(),
                reason: "must be smaller than population_size".to_string(),
            });
        }
        if a.tournament_size == 0 {
            return Err(Error::InvalidConfig {
                key: "optimization.algorithms.tournament_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn collect_diffs(
    prefix: String,
    current: &Value,
    default: &Value,
    out: &mut Vec<(String, String, String)>,
) {
    match (current, default) {
        (Value::Object(cur), Value::Object(def)) => {
            for (key, cur_value) in cur {
                let def_value = def.get(key).unwrap_or(&Value::Null);
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                collect_diffs(path, cur_value, def_value, out);
            }
        }
        _ => {
            if current != default {
                out.push((prefix, current.to_string(), default.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = Config::default();
        assert_eq!(config.weights.layers.student, 0.75);
        assert_eq!(config.weights.layers.class, 0.05);
        assert_eq!(config.weights.layers.school, 0.20);
        assert_eq!(config.weights.student_layer.friends, 0.7);
        assert_eq!(config.weights.school_layer.behavior_balance, 0.4);
        assert_eq!(config.normalization.class_size_factor, 5.0);
        assert_eq!(config.class_config.max_class_size, 30);
        assert_eq!(config.constraints.minimum_friends, 1);
        assert_eq!(config.optimization.max_iterations, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"constraints": {"minimum_friends": 2}}"#).unwrap();
        assert_eq!(config.constraints.minimum_friends, 2);
        assert!(config.constraints.respect_force_constraints);
        assert_eq!(config.optimization.early_stop_threshold, 100);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let result: std::result::Result<Config, _> =
            serde_json::from_str(r#"{"constrains": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn set_key_updates_and_validates() {
        let mut config = Config::default();
        config.set_key("weights.layers.student", "0.5").unwrap();
        assert_eq!(config.weights.layers.student, 0.5);

        config
            .set_key("constraints.respect_force_constraints", "false")
            .unwrap();
        assert!(!config.constraints.respect_force_constraints);

        assert!(config.set_key("weights.layers.does_not_exist", "1").is_err());
        assert!(config
            .set_key("optimization.algorithms.cooling_rate", "1.5")
            .is_err());
        // failed set must leave the config unchanged
        assert_eq!(config.optimization.algorithms.cooling_rate, 0.95);
    }

    #[test]
    fn all_zero_layer_weights_rejected() {
        let mut config = Config::default();
        config.weights.layers.student = 0.0;
        config.weights.layers.class = 0.0;
        config.weights.layers.school = 0.0;
        assert!(matches!(
            config.validate(),
            Err(crate::error::Error::InvalidConfig { key, .. }) if key == "weights.layers"
        ));
    }

    #[test]
    fn diff_reports_changed_keys_only() {
        let mut config = Config::default();
        assert!(config.diff_from_default().is_empty());
        config.constraints.minimum_friends = 3;
        let diffs = config.diff_from_default();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].0, "constraints.minimum_friends");
    }
}
