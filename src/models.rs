use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = String;

pub fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Instructor,
    #[serde(alias = "cliente")]
    Client,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClassStatus {
    #[serde(alias = "programada")]
    Scheduled,
    #[serde(alias = "en_progreso")]
    InProgress,
    #[serde(alias = "completada")]
    Completed,
    #[serde(alias = "cancelada")]
    Cancelled,
}

impl ClassStatus {
    /// Lifecycle edges: `scheduled -> in_progress -> completed`, with
    /// cancellation allowed from either non-terminal state.
    pub fn can_transition_to(self, next: ClassStatus) -> bool {
        use ClassStatus::*;
        matches!(
            (self, next),
            (Scheduled, InProgress)
                | (Scheduled, Completed)
                | (Scheduled, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ClassStatus::Completed | ClassStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    #[serde(alias = "confirmada")]
    Confirmed,
    #[serde(alias = "en_espera")]
    Waiting,
    #[serde(alias = "cancelada")]
    Cancelled,
    #[serde(alias = "completada")]
    Completed,
}

impl BookingStatus {
    /// Confirmed and waiting bookings still hold a place in a class.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Waiting)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[serde(alias = "pendiente")]
    Pending,
    #[serde(alias = "pagado")]
    Paid,
    #[serde(alias = "reembolsado")]
    Refunded,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
    #[serde(alias = "disponible")]
    Available,
    #[serde(alias = "mantenimiento")]
    Maintenance,
    #[serde(alias = "ocupado")]
    Occupied,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentType {
    Reformer,
    Cadillac,
    Chair,
    Barrel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    #[serde(alias = "Principiante")]
    Beginner,
    #[serde(alias = "Intermedio")]
    Intermediate,
    #[serde(alias = "Avanzado")]
    Advanced,
    #[serde(alias = "Todos")]
    All,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    #[serde(alias = "Mensual")]
    Monthly,
    #[serde(alias = "Trimestral")]
    Quarterly,
    #[serde(alias = "Anual")]
    Annual,
    #[serde(alias = "Por clase")]
    PerClass,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct User {
    pub id: Id,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub phone: Option<String>,
    #[schema(value_type = String, format = "date", example = "2025-01-15")]
    pub join_date: NaiveDate,
    pub is_active: bool,
    // instructor profile
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub experience: Option<String>,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub certifications: Vec<String>,
    // client profile
    #[serde(default)]
    pub membership: Option<Membership>,
    #[serde(default)]
    pub level: Option<Level>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Equipment {
    pub id: Id,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EquipmentType,
    pub status: EquipmentStatus,
    #[schema(value_type = String, format = "date", example = "2025-01-10")]
    pub last_maintenance: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ClassType {
    pub id: Id,
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

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ClassInstance {
    pub id: Id,
    pub class_type_id: Id,
    pub instructor_id: Id,
    #[schema(value_type = String, format = "date", example = "2025-11-24")]
    pub date: NaiveDate,
    #[schema(value_type = String, example = "09:00:00")]
    pub time: NaiveTime,
    pub duration_min: u32,
    pub equipment_id: Id,
    pub max_participants: u32,
    /// Confirmed client ids in arrival order.
    pub current_participants: Vec<Id>,
    /// Waiting client ids, head is the oldest request.
    pub waiting_list: Vec<Id>,
    pub status: ClassStatus,
    #[serde(default)]
    pub notes: Option<String>,
    pub price: f64,
}

impl ClassInstance {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.starts_at() + Duration::minutes(i64::from(self.duration_min))
    }

    pub fn is_full(&self) -> bool {
        self.current_participants.len() >= self.max_participants as usize
    }

    pub fn free_spots(&self) -> u32 {
        let taken = u32::try_from(self.current_participants.len()).unwrap_or(u32::MAX);
        self.max_participants.saturating_sub(taken)
    }

    pub fn is_confirmed(&self, client_id: &str) -> bool {
        self.current_participants.iter().any(|c| c == client_id)
    }

    pub fn is_waiting(&self, client_id: &str) -> bool {
        self.waiting_list.iter().any(|c| c == client_id)
    }

    pub fn is_bookable(&self) -> bool {
        self.status == ClassStatus::Scheduled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Booking {
    pub id: Id,
    pub class_id: Id,
    pub client_id: Id,
    #[schema(value_type = String, format = "date-time", example = "2025-11-20T18:30:00")]
    pub booking_date: NaiveDateTime,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

/// Identity of whoever is acting on the studio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Id,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<Id>, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Class instance joined with the names a timetable needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ClassSummary {
    pub class: ClassInstance,
    pub class_name: String,
    pub instructor_name: String,
    pub equipment_name: String,
    pub free_spots: u32,
    pub waiting: u32,
}
