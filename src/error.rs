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

//! The error taxonomy shared by all fallible boundaries of the crate.
//!
//! Hot-path constraint rejection is *not* an error: neighborhood operations
//! return [`crate::ops::Rejection`] instead, and algorithms silently retry.
//! Everything that aborts an operation or must be reported to the caller goes
//! through [`Error`].

use thiserror::Error;

use crate::model::StudentId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A cell of the input table failed validation (strict mode only).
    #[error("invalid value in column '{column}', row {row}: {reason}")]
    DataValidation {
        column: String,
        row: usize,
        reason: String,
    },

    /// A preference, dislike or force-group entry references a student id
    /// that does not exist in the roster.
    #[error("{kind} references unknown student id {id}")]
    DataReference { kind: &'static str, id: StudentId },

    /// No feasible starting assignment exists for the given roster and
    /// constraints.
    #[error("no feasible starting assignment: {reason}")]
    InfeasibleInitialization { reason: String },

    /// A hard-constraint violation reported on demand by the checker. The
    /// core never returns a run result with unresolved violations.
    #[error("hard constraint violated ({kind}): {details}")]
    ConstraintViolation { kind: String, details: String },

    /// The proposal space was exhausted without an acceptable move.
    #[error("algorithm stuck after {attempts} consecutive rejected proposals")]
    Stuck { attempts: usize },

    /// Cooperative cancellation was signalled.
    #[error("operation cancelled")]
    Cancelled,

    /// The wall-clock budget was exceeded.
    #[error("wall-clock budget exceeded")]
    Timeout,

    /// A scorer or operator error aborted a run.
    #[error("algorithm '{algorithm}' failed: {reason}")]
    RunFailed { algorithm: String, reason: String },

    /// A configuration document contained an unknown key or an out-of-range
    /// value.
    #[error("invalid configuration key '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table error: {0}")]
    Table(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The process exit code this error maps to (see the CLI contract).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::DataValidation { .. }
            | Error::DataReference { .. }
            | Error::ConstraintViolation { .. }
            | Error::InvalidConfig { .. } => 1,
            Error::InfeasibleInitialization { .. } => 2,
            Error::Cancelled | Error::Timeout => 3,
            _ => 4,
        }
    }
}
