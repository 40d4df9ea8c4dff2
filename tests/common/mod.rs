#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use studio_booking::clock::FixedClock;
use studio_booking::directory::SeedData;
use studio_booking::models::{
    Actor, ClassType, Equipment, EquipmentStatus, EquipmentType, Level, Membership, Role, User,
};
use studio_booking::policy::StudioPolicy;
use studio_booking::schedule::ClassDraft;
use studio_booking::store::Repository;
use studio_booking::studio::Studio;

pub const ADMIN: &str = "admin";
pub const INES: &str = "ines";
pub const MARTA: &str = "marta";
pub const CLIENTS: [&str; 4] = ["ana", "bea", "carla", "dani"];
pub const BED_1: &str = "bed-1";
pub const BED_2: &str = "bed-2";
pub const REFORMER: &str = "reformer-flow";

/// Monday 24 November 2025, 08:00 studio time.
pub fn now() -> NaiveDateTime {
    monday().and_hms_opt(8, 0, 0).unwrap()
}

pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 24).unwrap()
}

pub fn wednesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 26).unwrap()
}

pub fn at(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn user(id: &str, role: Role) -> User {
    User {
        id: id.to_string(),
        email: format!("{id}@studio.es"),
        name: id.to_string(),
        role,
        phone: None,
        join_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        is_active: true,
        specialties: vec![],
        experience: None,
        rating: None,
        certifications: vec![],
        membership: (role == Role::Client).then_some(Membership::Monthly),
        level: (role == Role::Client).then_some(Level::Beginner),
    }
}

fn bed(id: &str) -> Equipment {
    Equipment {
        id: id.to_string(),
        name: format!("Reformer {id}"),
        kind: EquipmentType::Reformer,
        status: EquipmentStatus::Available,
        last_maintenance: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
        notes: None,
    }
}

pub fn seed() -> SeedData {
    let mut users = vec![
        user(ADMIN, Role::Admin),
        user(INES, Role::Instructor),
        user(MARTA, Role::Instructor),
    ];
    users.extend(CLIENTS.iter().map(|id| user(id, Role::Client)));
    SeedData {
        users,
        equipment: vec![bed(BED_1), bed(BED_2)],
        class_types: vec![ClassType {
            id: REFORMER.to_string(),
            name: "Reformer Flow".to_string(),
            description: "Full body reformer session".to_string(),
            duration_min: 60,
            max_participants: 4,
            price: 20.0,
            level: Level::All,
            equipment_required: vec!["reformer".to_string()],
        }],
    }
}

pub fn studio_with(policy: StudioPolicy) -> Studio {
    let studio = Studio::new(Repository::in_memory(), policy, Arc::new(FixedClock(now())));
    studio.directory().seed_if_empty(seed()).unwrap();
    studio
}

pub fn studio() -> Studio {
    studio_with(StudioPolicy::default())
}

pub fn admin() -> Actor {
    Actor::new(ADMIN, Role::Admin)
}

pub fn client(id: &str) -> Actor {
    Actor::new(id, Role::Client)
}

pub fn draft(instructor: &str, equipment: &str, date: NaiveDate, time: NaiveTime) -> ClassDraft {
    ClassDraft {
        class_type_id: REFORMER.to_string(),
        instructor_id: instructor.to_string(),
        equipment_id: equipment.to_string(),
        date,
        time,
        duration_min: None,
        max_participants: None,
        price: None,
        notes: None,
    }
}
