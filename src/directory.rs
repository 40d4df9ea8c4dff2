use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use crate::error::BookingError;
use crate::models::{
    ClassInstance, ClassStatus, ClassType, Equipment, EquipmentStatus, EquipmentType, Id, Level,
    Membership, Role, User, new_id,
};
use crate::store::{EntityKind, Repository, Step};
use crate::validation::{
    validate_capacity, validate_duration, validate_email, validate_name, validate_price,
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub experience: Option<String>,
    #[serde(default)]
    pub certifications: Vec<String>,
    #[serde(default)]
    pub membership: Option<Membership>,
    #[serde(default)]
    pub level: Option<Level>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewEquipment {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EquipmentType,
    #[schema(value_type = String, format = "date")]
    pub last_maintenance: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewClassType {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub duration_min: u32,
    pub max_participants: u32,
    pub price: f64,
    pub level: Level,
    #[serde(default)]
    pub equipment_required: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ClassTypePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub duration_min: Option<u32>,
    pub max_participants: Option<u32>,
    pub price: Option<f64>,
    pub level: Option<Level>,
    pub equipment_required: Option<Vec<String>>,
}

/// Reference data loaded into an empty directory on first start.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub equipment: Vec<Equipment>,
    #[serde(default)]
    pub class_types: Vec<ClassType>,
}

fn validate_class_type(class_type: &ClassType) -> Result<(), BookingError> {
    validate_name("name", &class_type.name)?;
    validate_duration(class_type.duration_min)?;
    validate_capacity(class_type.max_participants)?;
    validate_price(class_type.price)
}

/// Users, equipment and class-type templates.
#[derive(Clone)]
pub struct Directory {
    repo: Repository,
}

impl Directory {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    fn find<T: serde::de::DeserializeOwned>(
        &self,
        kind: EntityKind,
        entity: &'static str,
        id: &str,
        id_of: impl Fn(&T) -> &str,
    ) -> Result<T, BookingError> {
        self.repo
            .load_all::<T>(kind)?
            .items
            .into_iter()
            .find(|item| id_of(item) == id)
            .ok_or_else(|| BookingError::not_found(entity, id))
    }

    fn live_classes(&self) -> Result<Vec<ClassInstance>, BookingError> {
        let classes = self.repo.load_all::<ClassInstance>(EntityKind::ClassInstances)?;
        Ok(classes.items)
    }

    pub fn create_user(&self, new: NewUser, today: NaiveDate) -> Result<User, BookingError> {
        validate_name("name", &new.name)?;
        validate_email(&new.email)?;
        let user = User {
            id: new_id(),
            email: normalize_email(&new.email),
            name: new.name,
            role: new.role,
            phone: new.phone,
            join_date: today,
            is_active: true,
            specialties: new.specialties,
            experience: new.experience,
            rating: None,
            certifications: new.certifications,
            membership: new.membership,
            level: new.level,
        };
        self.repo.transact::<User, _, BookingError, _>(EntityKind::Users, |users| {
            if users.iter().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
                return Err(BookingError::Validation(format!(
                    "a user with email {} already exists",
                    user.email
                )));
            }
            users.push(user.clone());
            Ok(Step::Commit(()))
        })?;
        info!(user_id = %user.id, role = ?user.role, "user created");
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> Result<User, BookingError> {
        self.find(EntityKind::Users, "user", id, |u: &User| &u.id)
    }

    pub fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, BookingError> {
        let users = self.repo.load_all::<User>(EntityKind::Users)?.items;
        Ok(users
            .into_iter()
            .filter(|u| role.is_none_or(|r| u.role == r))
            .collect())
    }

    /// Resolves an active user holding `role`.
    pub fn require_active(&self, id: &str, role: Role) -> Result<User, BookingError> {
        let user = self.get_user(id)?;
        if !user.is_active {
            return Err(BookingError::Validation(format!("user {id} is inactive")));
        }
        if user.role != role {
            return Err(BookingError::Validation(format!(
                "user {id} is not a {}",
                match role {
                    Role::Admin => "admin",
                    Role::Instructor => "instructor",
                    Role::Client => "client",
                }
            )));
        }
        Ok(user)
    }

    pub fn set_user_active(&self, id: &str, active: bool) -> Result<User, BookingError> {
        let user = self.repo.transact::<User, _, BookingError, _>(EntityKind::Users, |users| {
            let user = users
                .iter_mut()
                .find(|u| u.id == id)
                .ok_or_else(|| BookingError::not_found("user", id))?;
            user.is_active = active;
            Ok(Step::Commit(user.clone()))
        })?;
        info!(user_id = id, active, "user activation changed");
        Ok(user)
    }

    pub fn create_equipment(&self, new: NewEquipment) -> Result<Equipment, BookingError> {
        validate_name("name", &new.name)?;
        let equipment = Equipment {
            id: new_id(),
            name: new.name,
            kind: new.kind,
            status: EquipmentStatus::Available,
            last_maintenance: new.last_maintenance,
            notes: new.notes,
        };
        self.repo.transact::<Equipment, _, BookingError, _>(EntityKind::Equipment, |items| {
            items.push(equipment.clone());
            Ok(Step::Commit(()))
        })?;
        info!(equipment_id = %equipment.id, "equipment registered");
        Ok(equipment)
    }

    pub fn get_equipment(&self, id: &str) -> Result<Equipment, BookingError> {
        self.find(EntityKind::Equipment, "equipment", id, |e: &Equipment| &e.id)
    }

    pub fn list_equipment(&self) -> Result<Vec<Equipment>, BookingError> {
        Ok(self.repo.load_all::<Equipment>(EntityKind::Equipment)?.items)
    }

    pub fn available_equipment(&self) -> Result<Vec<Equipment>, BookingError> {
        Ok(self
            .list_equipment()?
            .into_iter()
            .filter(|e| e.status == EquipmentStatus::Available)
            .collect())
    }

    pub fn set_equipment_status(
        &self,
        id: &str,
        status: EquipmentStatus,
        serviced_on: Option<NaiveDate>,
    ) -> Result<Equipment, BookingError> {
        let equipment = self.repo.transact::<Equipment, _, BookingError, _>(EntityKind::Equipment, |items| {
            let equipment = items
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| BookingError::not_found("equipment", id))?;
            equipment.status = status;
            if let Some(date) = serviced_on {
                equipment.last_maintenance = date;
            }
            Ok(Step::Commit(equipment.clone()))
        })?;
        info!(equipment_id = id, status = ?status, "equipment status changed");
        Ok(equipment)
    }

    pub fn delete_equipment(&self, id: &str) -> Result<(), BookingError> {
        if let Some(class) = self
            .live_classes()?
            .iter()
            .find(|c| c.equipment_id == id && c.status != ClassStatus::Cancelled)
        {
            return Err(BookingError::InUse(format!(
                "equipment {id} is assigned to class {}",
                class.id
            )));
        }
        self.repo.transact::<Equipment, _, BookingError, _>(EntityKind::Equipment, |items| {
            let before = items.len();
            items.retain(|e| e.id != id);
            if items.len() == before {
                return Err(BookingError::not_found("equipment", id));
            }
            Ok(Step::Commit(()))
        })?;
        info!(equipment_id = id, "equipment removed");
        Ok(())
    }

    pub fn create_class_type(&self, new: NewClassType) -> Result<ClassType, BookingError> {
        let class_type = ClassType {
            id: new_id(),
            name: new.name,
            description: new.description,
            duration_min: new.duration_min,
            max_participants: new.max_participants,
            price: new.price,
            level: new.level,
            equipment_required: new.equipment_required,
        };
        validate_class_type(&class_type)?;
        self.repo.transact::<ClassType, _, BookingError, _>(EntityKind::ClassTypes, |items| {
            items.push(class_type.clone());
            Ok(Step::Commit(()))
        })?;
        info!(class_type_id = %class_type.id, name = %class_type.name, "class type created");
        Ok(class_type)
    }

    pub fn get_class_type(&self, id: &str) -> Result<ClassType, BookingError> {
        self.find(EntityKind::ClassTypes, "class type", id, |t: &ClassType| &t.id)
    }

    pub fn list_class_types(&self) -> Result<Vec<ClassType>, BookingError> {
        Ok(self.repo.load_all::<ClassType>(EntityKind::ClassTypes)?.items)
    }

    /// Existing class instances keep their own duration, capacity and price
    /// snapshot; only future instances inherit the edited defaults.
    pub fn update_class_type(&self, id: &str, patch: ClassTypePatch) -> Result<ClassType, BookingError> {
        let updated = self.repo.transact::<ClassType, _, BookingError, _>(EntityKind::ClassTypes, |items| {
            let class_type = items
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| BookingError::not_found("class type", id))?;
            let mut next = class_type.clone();
            if let Some(name) = &patch.name {
                next.name = name.clone();
            }
            if let Some(description) = &patch.description {
                next.description = description.clone();
            }
            next.duration_min = patch.duration_min.unwrap_or(next.duration_min);
            next.max_participants = patch.max_participants.unwrap_or(next.max_participants);
            next.price = patch.price.unwrap_or(next.price);
            next.level = patch.level.unwrap_or(next.level);
            if let Some(required) = &patch.equipment_required {
                next.equipment_required = required.clone();
            }
            validate_class_type(&next)?;
            *class_type = next.clone();
            Ok(Step::Commit(next))
        })?;
        info!(class_type_id = id, "class type updated");
        Ok(updated)
    }

    pub fn delete_class_type(&self, id: &str) -> Result<(), BookingError> {
        if let Some(class) = self.live_classes()?.iter().find(|c| c.class_type_id == id) {
            return Err(BookingError::InUse(format!(
                "class type {id} is used by class {}",
                class.id
            )));
        }
        self.repo.transact::<ClassType, _, BookingError, _>(EntityKind::ClassTypes, |items| {
            let before = items.len();
            items.retain(|t| t.id != id);
            if items.len() == before {
                return Err(BookingError::not_found("class type", id));
            }
            Ok(Step::Commit(()))
        })?;
        info!(class_type_id = id, "class type removed");
        Ok(())
    }

    /// Loads each collection of `seed` whose stored counterpart is empty.
    pub fn seed_if_empty(&self, seed: SeedData) -> Result<(), BookingError> {
        let users = seed
            .users
            .into_iter()
            .map(|user| User {
                email: normalize_email(&user.email),
                ..user
            })
            .collect();
        self.seed_collection(EntityKind::Users, users)?;
        self.seed_collection(EntityKind::Equipment, seed.equipment)?;
        self.seed_collection(EntityKind::ClassTypes, seed.class_types)?;
        Ok(())
    }

    fn seed_collection<T>(&self, kind: EntityKind, seed: Vec<T>) -> Result<(), BookingError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Clone,
    {
        if seed.is_empty() {
            return Ok(());
        }
        let seeded = self.repo.transact::<T, _, BookingError, _>(kind, |items| {
            if !items.is_empty() {
                return Ok(Step::Skip(false));
            }
            items.extend(seed.iter().cloned());
            Ok(Step::Commit(true))
        })?;
        if seeded {
            info!(%kind, count = seed.len(), "seeded collection");
        }
        Ok(())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 1).unwrap()
    }

    fn reformer() -> NewClassType {
        NewClassType {
            name: "Reformer Basics".into(),
            description: "Fundamentals on the reformer".into(),
            duration_min: 55,
            max_participants: 6,
            price: 22.0,
            level: Level::Beginner,
            equipment_required: vec!["reformer".into()],
        }
    }

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.into(),
            name: "Lucia".into(),
            role,
            phone: None,
            specialties: vec![],
            experience: None,
            certifications: vec![],
            membership: None,
            level: None,
        }
    }

    #[test]
    fn test_user_lifecycle() {
        let directory = Directory::new(Repository::in_memory());
        let user = directory
            .create_user(new_user("Lucia@Studio.es", Role::Client), today())
            .unwrap();
        assert_eq!(user.email, "lucia@studio.es");
        assert!(directory.require_active(&user.id, Role::Client).is_ok());
        assert!(matches!(
            directory.require_active(&user.id, Role::Instructor),
            Err(BookingError::Validation(_))
        ));

        directory.set_user_active(&user.id, false).unwrap();
        assert!(directory.require_active(&user.id, Role::Client).is_err());
        assert_eq!(directory.list_users(Some(Role::Client)).unwrap().len(), 1);
        assert!(directory.list_users(Some(Role::Admin)).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_email_is_rejected() {
        let directory = Directory::new(Repository::in_memory());
        directory
            .create_user(new_user("ana@studio.es", Role::Client), today())
            .unwrap();
        assert!(directory
            .create_user(new_user("ana@studio.es", Role::Instructor), today())
            .is_err());
    }

    #[test]
    fn test_class_type_validation_and_update() {
        let directory = Directory::new(Repository::in_memory());
        let mut bad = reformer();
        bad.duration_min = 0;
        assert!(directory.create_class_type(bad).is_err());

        let created = directory.create_class_type(reformer()).unwrap();
        let updated = directory
            .update_class_type(
                &created.id,
                ClassTypePatch {
                    price: Some(25.0),
                    ..ClassTypePatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.price, 25.0);
        assert_eq!(updated.duration_min, 55);

        let rejected = directory.update_class_type(
            &created.id,
            ClassTypePatch {
                max_participants: Some(0),
                ..ClassTypePatch::default()
            },
        );
        assert!(rejected.is_err());
        assert_eq!(directory.get_class_type(&created.id).unwrap().max_participants, 6);
    }

    #[test]
    fn test_referenced_resources_cannot_be_deleted() {
        let repo = Repository::in_memory();
        let directory = Directory::new(repo.clone());
        let class_type = directory.create_class_type(reformer()).unwrap();
        let bed = directory
            .create_equipment(NewEquipment {
                name: "Reformer 1".into(),
                kind: EquipmentType::Reformer,
                last_maintenance: today(),
                notes: None,
            })
            .unwrap();
        let class = ClassInstance {
            id: "c1".into(),
            class_type_id: class_type.id.clone(),
            instructor_id: "i1".into(),
            date: today(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            duration_min: 55,
            equipment_id: bed.id.clone(),
            max_participants: 6,
            current_participants: vec![],
            waiting_list: vec![],
            status: ClassStatus::Scheduled,
            notes: None,
            price: 22.0,
        };
        repo.save_all(EntityKind::ClassInstances, 0, &[class]).unwrap();

        assert!(matches!(
            directory.delete_class_type(&class_type.id),
            Err(BookingError::InUse(_))
        ));
        assert!(matches!(
            directory.delete_equipment(&bed.id),
            Err(BookingError::InUse(_))
        ));
        assert!(matches!(
            directory.delete_equipment("nope"),
            Err(BookingError::NotFound { .. })
        ));
    }

    #[test]
    fn test_equipment_status_filters_availability() {
        let directory = Directory::new(Repository::in_memory());
        let bed = directory
            .create_equipment(NewEquipment {
                name: "Cadillac".into(),
                kind: EquipmentType::Cadillac,
                last_maintenance: today(),
                notes: None,
            })
            .unwrap();
        assert_eq!(directory.available_equipment().unwrap().len(), 1);
        directory
            .set_equipment_status(&bed.id, EquipmentStatus::Maintenance, None)
            .unwrap();
        assert!(directory.available_equipment().unwrap().is_empty());
    }

    #[test]
    fn test_seed_only_fills_empty_collections() {
        let directory = Directory::new(Repository::in_memory());
        let first = directory.create_class_type(reformer()).unwrap();
        let seed = SeedData {
            class_types: vec![ClassType {
                id: "seeded".into(),
                ..first.clone()
            }],
            equipment: vec![Equipment {
                id: "bed-1".into(),
                name: "Reformer 1".into(),
                kind: EquipmentType::Reformer,
                status: EquipmentStatus::Available,
                last_maintenance: today(),
                notes: None,
            }],
            users: vec![],
        };
        directory.seed_if_empty(seed).unwrap();
        assert_eq!(directory.list_class_types().unwrap(), vec![first]);
        assert_eq!(directory.list_equipment().unwrap().len(), 1);
    }

    #[test]
    fn test_seeded_emails_are_normalized() {
        let directory = Directory::new(Repository::in_memory());
        let template = Directory::new(Repository::in_memory())
            .create_user(new_user("template@studio.es", Role::Client), today())
            .unwrap();
        let seed = SeedData {
            users: vec![User {
                id: "ana".into(),
                email: " Ana@Studio.ES ".into(),
                ..template
            }],
            equipment: vec![],
            class_types: vec![],
        };
        directory.seed_if_empty(seed).unwrap();
        assert_eq!(directory.get_user("ana").unwrap().email, "ana@studio.es");
        assert!(matches!(
            directory.create_user(new_user("ana@studio.es", Role::Client), today()),
            Err(BookingError::Validation(_))
        ));
    }
}
