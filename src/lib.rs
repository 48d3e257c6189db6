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

//! classplan: assign a roster of students to a small number of classes so
//! that a weighted three-layer quality score is maximized while hard
//! placement constraints (force locks, minimum friends) always hold.
//!
//! The library is the whole engine; presentation lives in the binary. The
//! usual flow is: import a table ([`io::table`]), build a feasible start
//! ([`init`]), optimize ([`coordinator`] over [`algorithms`]), evaluate
//! ([`scoring`]) and export ([`io::table`], [`io::report`]).

pub mod algorithms;
pub mod baseline;
pub mod config;
pub mod constraints;
pub mod coordinator;
pub mod error;
pub mod init;
pub mod io;
pub mod model;
pub mod ops;
pub mod progress;
pub mod scoring;

#[cfg(test)]
pub(crate) mod test;

pub use crate::error::{Error, Result};
pub use crate::model::{Gender, Rank, Roster, School, Student, StudentId};
