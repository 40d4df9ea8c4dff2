use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{ClassInstance, ClassStatus, Id};

/// Which resource two overlapping classes both claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResource {
    Equipment,
    Instructor,
}

impl fmt::Display for ConflictResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictResource::Equipment => f.write_str("equipment"),
            ConflictResource::Instructor => f.write_str("instructor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub resource: ConflictResource,
    pub class_id: Id,
}

/// Proposed placement of a class. `duration_min` is validated upstream.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_min: u32,
    pub instructor_id: &'a str,
    pub equipment_id: &'a str,
}

impl Candidate<'_> {
    pub fn window(&self) -> (NaiveDateTime, NaiveDateTime) {
        let start = self.date.and_time(self.time);
        (start, start + Duration::minutes(i64::from(self.duration_min)))
    }
}

impl<'a> From<&'a ClassInstance> for Candidate<'a> {
    fn from(class: &'a ClassInstance) -> Self {
        Candidate {
            date: class.date,
            time: class.time,
            duration_min: class.duration_min,
            instructor_id: &class.instructor_id,
            equipment_id: &class.equipment_id,
        }
    }
}

/// First live class whose `[start, end)` window overlaps the candidate and
/// that shares its instructor or its equipment unit. `exclude` skips the
/// class being edited in place.
pub fn check_conflict(
    candidate: &Candidate<'_>,
    existing: &[ClassInstance],
    exclude: Option<&str>,
) -> Option<Conflict> {
    let (start, end) = candidate.window();
    existing
        .iter()
        .filter(|other| other.status != ClassStatus::Cancelled)
        .filter(|other| exclude != Some(other.id.as_str()))
        .find_map(|other| {
            let same_equipment = other.equipment_id == candidate.equipment_id;
            let same_instructor = other.instructor_id == candidate.instructor_id;
            if !same_equipment && !same_instructor {
                return None;
            }
            if !(start < other.ends_at() && end > other.starts_at()) {
                return None;
            }
            let resource = if same_equipment {
                ConflictResource::Equipment
            } else {
                ConflictResource::Instructor
            };
            Some(Conflict {
                resource,
                class_id: other.id.clone(),
            })
        })
}
