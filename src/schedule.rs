use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::allocation::{close, find_mut, resize};
use crate::conflict::{Candidate, check_conflict};
use crate::directory::Directory;
use crate::error::BookingError;
use crate::models::{
    ClassInstance, ClassStatus, ClassSummary, EquipmentStatus, Id, Role, new_id,
};
use crate::policy::OperatingHours;
use crate::store::{EntityKind, Repository, Step};
use crate::validation::{validate_capacity, validate_duration, validate_price};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ClassDraft {
    pub class_type_id: Id,
    pub instructor_id: Id,
    pub equipment_id: Id,
    #[schema(value_type = String, format = "date", example = "2025-11-24")]
    pub date: NaiveDate,
    #[schema(value_type = String, example = "09:00:00")]
    pub time: NaiveTime,
    /// Defaults to the class type's duration.
    #[serde(default)]
    pub duration_min: Option<u32>,
    #[serde(default)]
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ClassPatch {
    #[schema(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
    #[schema(value_type = Option<String>)]
    pub time: Option<NaiveTime>,
    pub duration_min: Option<u32>,
    pub instructor_id: Option<Id>,
    pub equipment_id: Option<Id>,
    pub max_participants: Option<u32>,
    pub price: Option<f64>,
    pub notes: Option<String>,
}

impl ClassPatch {
    fn moves_schedule(&self) -> bool {
        self.date.is_some()
            || self.time.is_some()
            || self.duration_min.is_some()
            || self.instructor_id.is_some()
            || self.equipment_id.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ClassQuery {
    /// Classes on this exact day.
    #[param(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
    #[param(value_type = Option<String>, format = "date")]
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound.
    #[param(value_type = Option<String>, format = "date")]
    pub to: Option<NaiveDate>,
    pub instructor_id: Option<Id>,
    pub status: Option<ClassStatus>,
    /// Only scheduled classes with a free place.
    #[serde(default)]
    pub available_only: bool,
}

impl ClassQuery {
    fn matches(&self, class: &ClassInstance) -> bool {
        self.date.is_none_or(|d| class.date == d)
            && self.from.is_none_or(|d| class.date >= d)
            && self.to.is_none_or(|d| class.date <= d)
            && self
                .instructor_id
                .as_deref()
                .is_none_or(|id| class.instructor_id == id)
            && self.status.is_none_or(|s| class.status == s)
            && (!self.available_only || (class.is_bookable() && !class.is_full()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassUpdate {
    pub class: ClassInstance,
    /// Waiting clients confirmed by a capacity increase, oldest first.
    pub promoted: Vec<Id>,
}

#[derive(Clone)]
pub struct Schedule {
    repo: Repository,
    directory: Directory,
    hours: OperatingHours,
}

impl Schedule {
    pub fn new(repo: Repository, directory: Directory, hours: OperatingHours) -> Self {
        Self {
            repo,
            directory,
            hours,
        }
    }

    fn check_instructor(&self, id: &str) -> Result<(), BookingError> {
        self.directory.require_active(id, Role::Instructor).map(|_| ())
    }

    fn check_equipment(&self, id: &str) -> Result<(), BookingError> {
        let equipment = self.directory.get_equipment(id)?;
        if equipment.status != EquipmentStatus::Available {
            return Err(BookingError::Validation(format!(
                "equipment {} is not available ({:?})",
                equipment.name, equipment.status
            )));
        }
        Ok(())
    }

    pub fn create_class(&self, draft: ClassDraft) -> Result<ClassInstance, BookingError> {
        let class_type = self.directory.get_class_type(&draft.class_type_id)?;
        self.check_instructor(&draft.instructor_id)?;
        self.check_equipment(&draft.equipment_id)?;

        let class = ClassInstance {
            id: new_id(),
            class_type_id: class_type.id,
            instructor_id: draft.instructor_id,
            date: draft.date,
            time: draft.time,
            duration_min: draft.duration_min.unwrap_or(class_type.duration_min),
            equipment_id: draft.equipment_id,
            max_participants: draft.max_participants.unwrap_or(class_type.max_participants),
            current_participants: Vec::new(),
            waiting_list: Vec::new(),
            status: ClassStatus::Scheduled,
            notes: draft.notes,
            price: draft.price.unwrap_or(class_type.price),
        };
        validate_duration(class.duration_min)?;
        validate_capacity(class.max_participants)?;
        validate_price(class.price)?;
        self.hours.admits(class.date, class.time, class.duration_min)?;

        self.repo
            .transact::<ClassInstance, _, BookingError, _>(EntityKind::ClassInstances, |classes| {
                if let Some(conflict) = check_conflict(&Candidate::from(&class), classes, None) {
                    return Err(BookingError::ConflictDetected {
                        resource: conflict.resource,
                        class_id: conflict.class_id,
                    });
                }
                classes.push(class.clone());
                Ok(Step::Commit(()))
            })?;
        info!(class_id = %class.id, date = %class.date, time = %class.time, "class scheduled");
        Ok(class)
    }

    pub fn update_class(&self, id: &str, patch: ClassPatch) -> Result<ClassUpdate, BookingError> {
        if let Some(instructor_id) = &patch.instructor_id {
            self.check_instructor(instructor_id)?;
        }
        if let Some(equipment_id) = &patch.equipment_id {
            self.check_equipment(equipment_id)?;
        }
        if let Some(duration) = patch.duration_min {
            validate_duration(duration)?;
        }
        if let Some(price) = patch.price {
            validate_price(price)?;
        }

        let update = self
            .repo
            .transact::<ClassInstance, _, BookingError, _>(EntityKind::ClassInstances, |classes| {
                let mut next = find_mut(classes, id)?.clone();
                if patch.moves_schedule() {
                    if next.status != ClassStatus::Scheduled {
                        return Err(BookingError::Validation(format!(
                            "class {id} is {:?}; only scheduled classes can be moved",
                            next.status
                        )));
                    }
                    next.date = patch.date.unwrap_or(next.date);
                    next.time = patch.time.unwrap_or(next.time);
                    next.duration_min = patch.duration_min.unwrap_or(next.duration_min);
                    if let Some(instructor_id) = &patch.instructor_id {
                        next.instructor_id = instructor_id.clone();
                    }
                    if let Some(equipment_id) = &patch.equipment_id {
                        next.equipment_id = equipment_id.clone();
                    }
                    self.hours.admits(next.date, next.time, next.duration_min)?;
                    if let Some(conflict) = check_conflict(&Candidate::from(&next), classes, Some(id)) {
                        return Err(BookingError::ConflictDetected {
                            resource: conflict.resource,
                            class_id: conflict.class_id,
                        });
                    }
                }
                let promoted = match patch.max_participants {
                    Some(max) if max != next.max_participants => {
                        if next.status.is_terminal() {
                            return Err(BookingError::Validation(format!(
                                "class {id} is {:?}; its capacity can no longer change",
                                next.status
                            )));
                        }
                        resize(&mut next, max)?
                    }
                    _ => Vec::new(),
                };
                next.price = patch.price.unwrap_or(next.price);
                if let Some(notes) = &patch.notes {
                    next.notes = Some(notes.clone());
                }
                *find_mut(classes, id)? = next.clone();
                Ok(Step::Commit(ClassUpdate {
                    class: next,
                    promoted,
                }))
            })?;
        info!(class_id = id, promoted = update.promoted.len(), "class updated");
        Ok(update)
    }

    pub fn set_class_status(&self, id: &str, status: ClassStatus) -> Result<ClassInstance, BookingError> {
        let (class, released) = self
            .repo
            .transact::<ClassInstance, _, BookingError, _>(EntityKind::ClassInstances, |classes| {
                let class = find_mut(classes, id)?;
                if !class.status.can_transition_to(status) {
                    return Err(BookingError::Validation(format!(
                        "class {id} cannot move from {:?} to {status:?}",
                        class.status
                    )));
                }
                class.status = status;
                let released = close(class, status);
                Ok(Step::Commit((class.clone(), released)))
            })?;
        info!(class_id = id, status = ?status, released = released.len(), "class status changed");
        Ok(class)
    }

    pub fn get_class(&self, id: &str) -> Result<ClassInstance, BookingError> {
        self.all()?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| BookingError::not_found("class", id))
    }

    fn all(&self) -> Result<Vec<ClassInstance>, BookingError> {
        Ok(self
            .repo
            .load_all::<ClassInstance>(EntityKind::ClassInstances)?
            .items)
    }

    pub fn list_classes(&self, query: &ClassQuery) -> Result<Vec<ClassInstance>, BookingError> {
        let mut classes: Vec<_> = self.all()?.into_iter().filter(|c| query.matches(c)).collect();
        classes.sort_by_key(|c| c.starts_at());
        Ok(classes)
    }

    pub fn available_classes(&self, date: Option<NaiveDate>) -> Result<Vec<ClassInstance>, BookingError> {
        self.list_classes(&ClassQuery {
            date,
            available_only: true,
            ..ClassQuery::default()
        })
    }

    /// Non-cancelled classes in `[from, from + weeks)` with display names.
    pub fn timetable(&self, from: NaiveDate, weeks: u8) -> Result<Vec<ClassSummary>, BookingError> {
        let to = from + Duration::weeks(i64::from(weeks)) - Duration::days(1);
        let classes = self.list_classes(&ClassQuery {
            from: Some(from),
            to: Some(to),
            ..ClassQuery::default()
        })?;

        let class_names: HashMap<Id, String> = self
            .directory
            .list_class_types()?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect();
        let instructor_names: HashMap<Id, String> = self
            .directory
            .list_users(Some(Role::Instructor))?
            .into_iter()
            .map(|u| (u.id, u.name))
            .collect();
        let equipment_names: HashMap<Id, String> = self
            .directory
            .list_equipment()?
            .into_iter()
            .map(|e| (e.id, e.name))
            .collect();

        let lookup = |names: &HashMap<Id, String>, id: &str| {
            names.get(id).cloned().unwrap_or_else(|| id.to_string())
        };
        Ok(classes
            .into_iter()
            .filter(|c| c.status != ClassStatus::Cancelled)
            .map(|class| ClassSummary {
                class_name: lookup(&class_names, &class.class_type_id),
                instructor_name: lookup(&instructor_names, &class.instructor_id),
                equipment_name: lookup(&equipment_names, &class.equipment_id),
                free_spots: class.free_spots(),
                waiting: u32::try_from(class.waiting_list.len()).unwrap_or(u32::MAX),
                class,
            })
            .collect())
    }
}
