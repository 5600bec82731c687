use super::{EmployeeRecord, EmployeeStatus};
use crate::workflows::evaluations::domain::SubjectId;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::io::Read;

pub(crate) fn parse_roster<R: Read>(reader: R) -> Result<Vec<EmployeeRecord>, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut seen = HashSet::new();
    let mut employees = Vec::new();

    for record in csv_reader.deserialize::<RosterRow>() {
        let row = record?;
        let (Some(id), Some(name)) = (row.employee_id, row.name) else {
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }

        employees.push(EmployeeRecord {
            id: SubjectId(id),
            name,
            status: row
                .status
                .as_deref()
                .map(EmployeeStatus::parse)
                .unwrap_or(EmployeeStatus::Unknown),
        });
    }

    Ok(employees)
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(
        rename = "Employee ID",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    employee_id: Option<String>,
    #[serde(rename = "Name", default, deserialize_with = "empty_string_as_none")]
    name: Option<String>,
    #[serde(rename = "Status", default, deserialize_with = "empty_string_as_none")]
    status: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
