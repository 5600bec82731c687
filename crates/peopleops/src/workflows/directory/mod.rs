//! Read-only employee directory consumed when picking evaluation subjects.

mod parser;

use crate::workflows::evaluations::domain::SubjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

/// Employment status as recorded by HR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeStatus {
    Active,
    Probation,
    OnLeave,
    Terminated,
    Unknown,
}

impl EmployeeStatus {
    /// Lenient parse covering the labels HR exports use (English and Portuguese).
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" | "ativo" | "ativa" => Self::Active,
            "probation" | "experiencia" | "experiência" => Self::Probation,
            "on_leave" | "on leave" | "leave" | "afastado" | "afastada" | "ferias" | "férias" => {
                Self::OnLeave
            }
            "terminated" | "inactive" | "desligado" | "desligada" | "inativo" => Self::Terminated,
            _ => Self::Unknown,
        }
    }

    /// Statuses that may receive a new evaluation.
    pub fn active_like() -> BTreeSet<EmployeeStatus> {
        BTreeSet::from([Self::Active, Self::Probation, Self::OnLeave])
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Probation => "probation",
            Self::OnLeave => "on_leave",
            Self::Terminated => "terminated",
            Self::Unknown => "unknown",
        }
    }
}

/// Directory row, including the status used for eligibility filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub id: SubjectId,
    pub name: String,
    pub status: EmployeeStatus,
}

/// Picker entry returned to callers populating a subject selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSummary {
    pub id: SubjectId,
    pub name: String,
}

/// Lookup boundary onto the HR system of record.
pub trait EmployeeDirectory: Send + Sync {
    /// Subjects whose status is in `statuses`, ordered by name then id.
    fn list_eligible_subjects(
        &self,
        statuses: &BTreeSet<EmployeeStatus>,
    ) -> Result<Vec<SubjectSummary>, DirectoryError>;

    fn subject(&self, id: &SubjectId) -> Result<Option<EmployeeRecord>, DirectoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to read employee roster: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid employee roster CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("employee directory unavailable: {0}")]
    Unavailable(String),
}

/// Directory backed by a roster snapshot, typically a CSV export.
#[derive(Debug, Clone, Default)]
pub struct RosterDirectory {
    employees: Vec<EmployeeRecord>,
}

impl RosterDirectory {
    pub fn new(employees: Vec<EmployeeRecord>) -> Self {
        Self { employees }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DirectoryError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Expects the `Employee ID,Name,Status` header; blank and duplicate ids are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DirectoryError> {
        Ok(Self::new(parser::parse_roster(reader)?))
    }

    pub fn employees(&self) -> &[EmployeeRecord] {
        &self.employees
    }
}

impl EmployeeDirectory for RosterDirectory {
    fn list_eligible_subjects(
        &self,
        statuses: &BTreeSet<EmployeeStatus>,
    ) -> Result<Vec<SubjectSummary>, DirectoryError> {
        let mut subjects: Vec<SubjectSummary> = self
            .employees
            .iter()
            .filter(|employee| statuses.contains(&employee.status))
            .map(|employee| SubjectSummary {
                id: employee.id.clone(),
                name: employee.name.clone(),
            })
            .collect();
        subjects.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(subjects)
    }

    fn subject(&self, id: &SubjectId) -> Result<Option<EmployeeRecord>, DirectoryError> {
        Ok(self
            .employees
            .iter()
            .find(|employee| &employee.id == id)
            .cloned())
    }
}
