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

//! Tabular roster import and export.
//!
//! The input is a CSV file with a header row. Known columns are parsed
//! into the domain model; any other column is preserved opaquely per
//! student and re-emitted in input order on export. Row numbers in errors
//! are spreadsheet rows (the header is row 1).
//!
//! Under strict validation every bad cell is an error. Under
//! `--skip-validation` each invalid cell is normalized to a safe default
//! instead: a synthetic 9-digit id from a stable hash, "Unknown"/"Student"
//! names, gender "M", score 50.0, ranks "A", no assistance, and invalid
//! ids filtered out of the peer and force-group lists.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::init;
use crate::model::{Gender, Rank, Roster, School, Student, StudentId};

pub const REQUIRED_COLUMNS: [&str; 8] = [
    "student_id",
    "first_name",
    "last_name",
    "gender",
    "academic_score",
    "behavior_rank",
    "studentiality_rank",
    "assistance_package",
];
const CLASS: &str = "class";
const SCHOOL: &str = "school";
const FORCE_CLASS: &str = "force_class";
const FORCE_FRIEND: &str = "force_friend";

fn friend_column(n: usize) -> String {
    format!("preferred_friend_{}", n)
}

fn dislike_column(n: usize) -> String {
    format!("disliked_peer_{}", n)
}

fn known_columns() -> HashSet<String> {
    let mut known: HashSet<String> =
        REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect();
    known.insert(CLASS.to_string());
    known.insert(SCHOOL.to_string());
    known.insert(FORCE_CLASS.to_string());
    known.insert(FORCE_FRIEND.to_string());
    for n in 1..=3 {
        known.insert(friend_column(n));
    }
    for n in 1..=5 {
        known.insert(dislike_column(n));
    }
    known
}

/// A 9-digit id or nothing.
fn parse_id(raw: &str) -> Option<StudentId> {
    if raw.len() != 9 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" => Some(false),
        "true" | "1" | "yes" => Some(true),
        _ => None,
    }
}

/// FNV-1a, the stable hash behind synthetic ids.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn synthetic_id(record: &csv::StringRecord, row: usize, used: &HashSet<StudentId>) -> StudentId {
    let mut material = row.to_string();
    for cell in record.iter() {
        material.push('\u{1f}');
        material.push_str(cell);
    }
    let mut id = 100_000_000 + (fnv1a(material.as_bytes()) % 900_000_000) as StudentId;
    while used.contains(&id) {
        id = if id == 999_999_999 { 100_000_000 } else { id + 1 };
    }
    id
}

/// Union-find over row indices, used to knit `force_friend` lists into
/// whole groups.
struct Dsu {
    parent: Vec<usize>,
}

impl Dsu {
    fn new(n: usize) -> Dsu {
        Dsu {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// One parsed data row before cross-row resolution.
struct RawRow {
    row: usize,
    student: Student,
    class_label: String,
    force_class_label: String,
    force_friends: Vec<StudentId>,
    extras: BTreeMap<String, String>,
}

pub fn read_path<P: AsRef<Path>>(
    path: P,
    config: &Config,
    skip_validation: bool,
) -> Result<School> {
    let file = File::open(path)?;
    read(file, config, skip_validation)
}

/// Read a roster table into a school snapshot.
///
/// Classes come from the distinct non-empty `class` labels in label-sorted
/// order; a table without them produces an unassigned snapshot with
/// `target_classes` default-labelled classes.
pub fn read<R: Read>(reader: R, config: &Config, skip_validation: bool) -> Result<School> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers: Vec<String> = csv_reader.headers()?.iter().map(String::from).collect();
    let column_index: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.clone(), i))
        .collect();

    if !skip_validation {
        for column in REQUIRED_COLUMNS.iter() {
            if !column_index.contains_key(*column) {
                return Err(Error::DataValidation {
                    column: column.to_string(),
                    row: 1,
                    reason: "missing required column".to_string(),
                });
            }
        }
    }
    let mut columns = headers.clone();
    if !column_index.contains_key(CLASS) {
        columns.push(CLASS.to_string());
    }
    let known = known_columns();

    let mut rows: Vec<RawRow> = Vec::new();
    let mut used_ids: HashSet<StudentId> = HashSet::new();
    for (i, record) in csv_reader.records().enumerate() {
        let record = record?;
        let row = i + 2; // spreadsheet row; header is row 1
        let raw = parse_row(
            &record,
            row,
            &column_index,
            &known,
            &mut used_ids,
            skip_validation,
        )?;
        rows.push(raw);
    }

    resolve(rows, columns, config, skip_validation)
}

fn parse_row(
    record: &csv::StringRecord,
    row: usize,
    column_index: &HashMap<String, usize>,
    known: &HashSet<String>,
    used_ids: &mut HashSet<StudentId>,
    skip_validation: bool,
) -> Result<RawRow> {
    let cell = |name: &str| -> &str {
        column_index
            .get(name)
            .and_then(|i| record.get(*i))
            .unwrap_or("")
            .trim()
    };
    let invalid = |column: &str, reason: String| -> Error {
        Error::DataValidation {
            column: column.to_string(),
            row,
            reason,
        }
    };

    let id = match parse_id(cell("student_id")) {
        Some(id) if !used_ids.contains(&id) => id,
        Some(id) => {
            if skip_validation {
                warn!("row {}: duplicate id {}, synthesizing a new one", row, id);
                synthetic_id(record, row, used_ids)
            } else {
                return Err(invalid("student_id", format!("duplicate id {}", id)));
            }
        }
        None => {
            if skip_validation {
                synthetic_id(record, row, used_ids)
            } else {
                return Err(invalid(
                    "student_id",
                    format!("'{}' is not a 9-digit id", cell("student_id")),
                ));
            }
        }
    };
    used_ids.insert(id);

    let name = |column: &str, fallback: &str| -> Result<String> {
        let value = cell(column);
        if value.is_empty() {
            if skip_validation {
                Ok(fallback.to_string())
            } else {
                Err(invalid(column, "must not be empty".to_string()))
            }
        } else {
            Ok(value.to_string())
        }
    };
    let first_name = name("first_name", "Unknown")?;
    let last_name = name("last_name", "Student")?;

    let gender = match Gender::parse(cell("gender")) {
        Some(gender) => gender,
        None if skip_validation => Gender::M,
        None => {
            return Err(invalid(
                "gender",
                format!("'{}' is not one of M, F", cell("gender")),
            ))
        }
    };

    let academic_score = match cell("academic_score").parse::<f64>() {
        Ok(score) if (0.0..=100.0).contains(&score) => score,
        _ if skip_validation => 50.0,
        _ => {
            return Err(invalid(
                "academic_score",
                format!("'{}' is not a number in [0, 100]", cell("academic_score")),
            ))
        }
    };

    let rank = |column: &str| -> Result<Rank> {
        match Rank::parse(cell(column)) {
            Some(rank) => Ok(rank),
            None if skip_validation => Ok(Rank::A),
            None => Err(invalid(
                column,
                format!("'{}' is not one of A, B, C, D", cell(column)),
            )),
        }
    };
    let behavior_rank = rank("behavior_rank")?;
    let studentiality_rank = rank("studentiality_rank")?;

    let assistance_package = match parse_bool(cell("assistance_package")) {
        Some(flag) => flag,
        None if skip_validation => false,
        None => {
            return Err(invalid(
                "assistance_package",
                format!("'{}' is not a boolean", cell("assistance_package")),
            ))
        }
    };

    let peer_list = |prefix: &dyn Fn(usize) -> String, count: usize| -> Result<Vec<StudentId>> {
        let mut peers = Vec::new();
        for n in 1..=count {
            let column = prefix(n);
            let value = cell(&column);
            if value.is_empty() {
                continue;
            }
            match parse_id(value) {
                Some(peer) => peers.push(peer),
                None if skip_validation => {
                    debug!("row {}: dropping malformed peer id '{}'", row, value)
                }
                None => {
                    return Err(invalid(
                        &column,
                        format!("'{}' is not a 9-digit id", value),
                    ))
                }
            }
        }
        Ok(peers)
    };
    let preferred_friends = peer_list(&friend_column, 3)?;
    let disliked_peers = peer_list(&dislike_column, 5)?;

    let mut force_friends = Vec::new();
    for value in cell(FORCE_FRIEND).split(',') {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match parse_id(value) {
            Some(peer) => force_friends.push(peer),
            None if skip_validation => {
                debug!("row {}: dropping malformed force friend '{}'", row, value)
            }
            None => {
                return Err(invalid(
                    FORCE_FRIEND,
                    format!("'{}' is not a 9-digit id", value),
                ))
            }
        }
    }

    let mut extras = BTreeMap::new();
    for (column, index) in column_index.iter() {
        if !known.contains(column) {
            extras.insert(
                column.clone(),
                record.get(*index).unwrap_or("").to_string(),
            );
        }
    }

    Ok(RawRow {
        row,
        student: Student {
            index: 0,
            id,
            first_name,
            last_name,
            gender,
            academic_score,
            behavior_rank,
            studentiality_rank,
            assistance_package,
            school_of_origin: cell(SCHOOL).to_string(),
            preferred_friends,
            disliked_peers,
            force_class: None,
            force_group: None,
        },
        class_label: cell(CLASS).to_string(),
        force_class_label: cell(FORCE_CLASS).to_string(),
        force_friends,
        extras,
    })
}

/// Cross-row resolution: class labels, force classes, force groups and
/// reference cleanup, then snapshot construction.
fn resolve(
    mut rows: Vec<RawRow>,
    columns: Vec<String>,
    config: &Config,
    skip_validation: bool,
) -> Result<School> {
    let ids: HashSet<StudentId> = rows.iter().map(|r| r.student.id).collect();
    let index_of: HashMap<StudentId, usize> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| (r.student.id, i))
        .collect();

    // Under skip-validation unknown references are filtered here; under
    // strict validation Roster::new reports them.
    if skip_validation {
        for raw in rows.iter_mut() {
            raw.student.preferred_friends.retain(|id| ids.contains(id));
            raw.student.disliked_peers.retain(|id| ids.contains(id));
            raw.force_friends.retain(|id| ids.contains(id));
        }
    }

    // Class labels in sorted order; fall back to derived defaults
    let mut labels: Vec<String> = rows
        .iter()
        .map(|r| r.class_label.clone())
        .filter(|l| !l.is_empty())
        .collect::<std::collections::BTreeSet<String>>()
        .into_iter()
        .collect();
    if labels.is_empty() {
        labels = init::default_labels(init::target_classes(rows.len(), config));
    }

    // Force groups from the force_friend lists
    let mut dsu = Dsu::new(rows.len());
    for (i, raw) in rows.iter().enumerate() {
        for peer in &raw.force_friends {
            match index_of.get(peer) {
                Some(j) => dsu.union(i, *j),
                None => {
                    return Err(Error::DataReference {
                        kind: "force_friend",
                        id: *peer,
                    })
                }
            }
        }
    }
    let mut group_min_id: HashMap<usize, StudentId> = HashMap::new();
    let mut group_sizes: HashMap<usize, usize> = HashMap::new();
    for i in 0..rows.len() {
        let root = dsu.find(i);
        *group_sizes.entry(root).or_insert(0) += 1;
        let id = rows[i].student.id;
        group_min_id
            .entry(root)
            .and_modify(|min| *min = (*min).min(id))
            .or_insert(id);
    }
    for i in 0..rows.len() {
        let root = dsu.find(i);
        if group_sizes[&root] > 1 {
            rows[i].student.force_group = Some(format!("g{}", group_min_id[&root]));
        }
    }

    // Resolve force classes against the label set
    for raw in rows.iter_mut() {
        if raw.force_class_label.is_empty() {
            continue;
        }
        match labels.iter().position(|l| *l == raw.force_class_label) {
            Some(c) => raw.student.force_class = Some(c),
            None if skip_validation => {
                warn!(
                    "row {}: dropping force class '{}', no such class",
                    raw.row, raw.force_class_label
                );
            }
            None => {
                return Err(Error::DataValidation {
                    column: FORCE_CLASS.to_string(),
                    row: raw.row,
                    reason: format!("unknown class '{}'", raw.force_class_label),
                })
            }
        }
    }

    let mut students = Vec::with_capacity(rows.len());
    let mut extras = Vec::with_capacity(rows.len());
    let mut class_of: Vec<Option<usize>> = Vec::with_capacity(rows.len());
    for raw in rows {
        class_of.push(if raw.class_label.is_empty() {
            None
        } else {
            labels.iter().position(|l| *l == raw.class_label)
        });
        students.push(raw.student);
        extras.push(raw.extras);
    }

    let roster = Arc::new(Roster::new(students, columns, extras)?);
    School::from_assignment(roster, labels, class_of)
}

pub fn write_path<P: AsRef<Path>>(path: P, school: &School) -> Result<()> {
    let file = File::create(path)?;
    write(file, school)
}

/// Emit the snapshot as a table with exactly the input columns in input
/// order and `class` populated. The output starts with a UTF-8 byte-order
/// mark so spreadsheets render non-ASCII names correctly.
pub fn write<W: Write>(mut writer: W, school: &School) -> Result<()> {
    writer.write_all(b"\xEF\xBB\xBF")?;
    let mut csv_writer = csv::Writer::from_writer(writer);

    let roster = school.roster();
    let columns: Vec<String> = if roster.columns().is_empty() {
        default_columns()
    } else {
        roster.columns().to_vec()
    };
    csv_writer.write_record(&columns)?;

    for student in roster.students() {
        let record: Vec<String> = columns
            .iter()
            .map(|column| cell_value(school, student.index, column))
            .collect();
        csv_writer.write_record(&record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Column list for snapshots that were not built from a table.
fn default_columns() -> Vec<String> {
    let mut columns: Vec<String> = REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect();
    columns.push(CLASS.to_string());
    columns.push(SCHOOL.to_string());
    for n in 1..=3 {
        columns.push(friend_column(n));
    }
    for n in 1..=5 {
        columns.push(dislike_column(n));
    }
    columns.push(FORCE_CLASS.to_string());
    columns.push(FORCE_FRIEND.to_string());
    columns
}

fn cell_value(school: &School, i: usize, column: &str) -> String {
    let roster = school.roster();
    let student = roster.student(i);
    let nth = |list: &[StudentId], n: usize| -> String {
        list.get(n - 1).map(|id| id.to_string()).unwrap_or_default()
    };

    match column {
        "student_id" => student.id.to_string(),
        "first_name" => student.first_name.clone(),
        "last_name" => student.last_name.clone(),
        "gender" => student.gender.as_str().to_string(),
        "academic_score" => student.academic_score.to_string(),
        "behavior_rank" => student.behavior_rank.as_str().to_string(),
        "studentiality_rank" => student.studentiality_rank.as_str().to_string(),
        "assistance_package" => student.assistance_package.to_string(),
        CLASS => school
            .class_of(i)
            .map(|c| school.label(c).to_string())
            .unwrap_or_default(),
        SCHOOL => student.school_of_origin.clone(),
        FORCE_CLASS => student
            .force_class
            .map(|c| school.label(c).to_string())
            .unwrap_or_default(),
        FORCE_FRIEND => match roster.group_of(i) {
            Some(g) => roster.groups()[g]
                .members
                .iter()
                .filter(|m| **m != i)
                .map(|m| roster.student(*m).id.to_string())
                .collect::<Vec<String>>()
                .join(","),
            None => String::new(),
        },
        _ => {
            if let Some(n) = column
                .strip_prefix("preferred_friend_")
                .and_then(|n| n.parse::<usize>().ok())
            {
                return nth(&student.preferred_friends, n);
            }
            if let Some(n) = column
                .strip_prefix("disliked_peer_")
                .and_then(|n| n.parse::<usize>().ok())
            {
                return nth(&student.disliked_peers, n);
            }
            roster.extras(i).get(column).cloned().unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "student_id,first_name,last_name,gender,academic_score,\
                          behavior_rank,studentiality_rank,assistance_package";

    fn read_str(data: &str, skip: bool) -> Result<School> {
        read(data.as_bytes(), &Config::default(), skip)
    }

    #[test]
    fn minimal_table_without_classes_is_unassigned() {
        let data = format!(
            "{}\n100000001,Dana,Cohen,F,88.5,A,B,false\n100000002,Omer,Levi,M,73,B,A,true\n",
            HEADER
        );
        let school = read_str(&data, false).unwrap();
        assert_eq!(school.roster().len(), 2);
        assert_eq!(school.assigned_count(), 0);
        assert_eq!(school.num_classes(), 1); // 2 students -> 1 class
        assert_eq!(school.roster().columns().last().unwrap(), "class");
        let dana = school.roster().student(0);
        assert_eq!(dana.academic_score, 88.5);
        assert_eq!(dana.behavior_rank, crate::model::Rank::A);
        assert!(!dana.assistance_package);
    }

    #[test]
    fn class_labels_are_collected_sorted() {
        let data = format!(
            "{},class\n100000001,A,A,M,50,A,A,false,blue\n100000002,B,B,F,50,A,A,false,amber\n100000003,C,C,M,50,A,A,false,\n",
            HEADER
        );
        let school = read_str(&data, false).unwrap();
        assert_eq!(school.labels(), &["amber".to_string(), "blue".to_string()]);
        assert_eq!(school.class_of(0), Some(1));
        assert_eq!(school.class_of(1), Some(0));
        assert_eq!(school.class_of(2), None);
    }

    #[test]
    fn strict_validation_rejects_bad_cells() {
        let data = format!("{}\nnope,Dana,Cohen,F,88.5,A,B,false\n", HEADER);
        match read_str(&data, false) {
            Err(Error::DataValidation { column, row, .. }) => {
                assert_eq!(column, "student_id");
                assert_eq!(row, 2);
            }
            other => panic!("expected a validation error, got {:?}", other.map(|_| ())),
        }

        let data = format!("{}\n100000001,Dana,Cohen,F,88.5,E,B,false\n", HEADER);
        assert!(matches!(
            read_str(&data, false),
            Err(Error::DataValidation { column, .. }) if column == "behavior_rank"
        ));
    }

    #[test]
    fn skip_validation_normalizes_instead() {
        let data = format!(
            "{}\nnope,,,X,999,E,Z,maybe\n100000002,Omer,Levi,M,73,B,A,true\n",
            HEADER
        );
        let school = read_str(&data, true).unwrap();
        let fixed = school.roster().student(0);
        assert!(fixed.id >= 100_000_000 && fixed.id <= 999_999_999);
        assert_eq!(fixed.first_name, "Unknown");
        assert_eq!(fixed.last_name, "Student");
        assert_eq!(fixed.gender, Gender::M);
        assert_eq!(fixed.academic_score, 50.0);
        assert_eq!(fixed.behavior_rank, Rank::A);
        assert!(!fixed.assistance_package);
    }

    #[test]
    fn skip_validation_is_deterministic() {
        let data = format!("{}\nnope,,,X,999,E,Z,maybe\n", HEADER);
        let a = read_str(&data, true).unwrap();
        let b = read_str(&data, true).unwrap();
        assert_eq!(a.roster().student(0).id, b.roster().student(0).id);
    }

    #[test]
    fn force_friend_lists_become_groups() {
        let data = format!(
            "{},force_friend\n\
             100000001,A,A,M,50,A,A,false,\"100000002\"\n\
             100000002,B,B,F,50,A,A,false,\"100000003\"\n\
             100000003,C,C,M,50,A,A,false,\n\
             100000004,D,D,F,50,A,A,false,\n",
            HEADER
        );
        let school = read_str(&data, false).unwrap();
        let roster = school.roster();
        // transitively one group of three, tagged by the smallest id
        assert_eq!(roster.groups().len(), 1);
        assert_eq!(roster.groups()[0].tag, "g100000001");
        assert_eq!(roster.groups()[0].members, vec![0, 1, 2]);
        assert_eq!(roster.group_of(3), None);
    }

    #[test]
    fn unknown_peer_reference_is_strict_error_but_filtered_in_skip_mode() {
        let data = format!(
            "{},preferred_friend_1\n100000001,A,A,M,50,A,A,false,999999999\n",
            HEADER
        );
        assert!(matches!(
            read_str(&data, false),
            Err(Error::DataReference {
                kind: "preferred_friends",
                id: 999999999
            })
        ));
        let school = read_str(&data, true).unwrap();
        assert!(school.roster().student(0).preferred_friends.is_empty());
    }

    #[test]
    fn round_trip_preserves_known_and_unknown_columns() {
        let data = format!(
            "{},class,school,preferred_friend_1,allergies,locker\n\
             100000001,Dana,Cohen,F,88.5,A,B,false,blue,North,100000002,peanuts,17\n\
             100000002,Omer,Levi,M,73,B,A,true,amber,South,,,3\n",
            HEADER
        );
        let config = Config::default();
        let first = read(data.as_bytes(), &config, false).unwrap();

        let mut buffer = Vec::new();
        write(&mut buffer, &first).unwrap();
        assert_eq!(&buffer[..3], b"\xEF\xBB\xBF");

        let second = read(&buffer[..], &config, false).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.roster().extras(0).get("allergies").unwrap(), "peanuts");
        assert_eq!(second.roster().extras(1).get("locker").unwrap(), "3");
        assert_eq!(
            second.roster().columns(),
            first.roster().columns()
        );

        // a second export must be byte-identical
        let mut third = Vec::new();
        write(&mut third, &second).unwrap();
        assert_eq!(buffer, third);
    }

    #[test]
    fn force_class_labels_must_exist() {
        let data = format!(
            "{},class,force_class\n\
             100000001,A,A,M,50,A,A,false,blue,green\n\
             100000002,B,B,F,50,A,A,false,blue,\n",
            HEADER
        );
        assert!(matches!(
            read_str(&data, false),
            Err(Error::DataValidation { column, .. }) if column == "force_class"
        ));
        let school = read_str(&data, true).unwrap();
        assert_eq!(school.roster().student(0).force_class, None);
    }
}
