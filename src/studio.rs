use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::broadcast;
use tracing::info;

use crate::allocation::AllocationEngine;
use crate::clock::Clock;
use crate::directory::{ClassTypePatch, Directory, NewClassType, NewEquipment, NewUser};
use crate::error::BookingError;
use crate::ledger::BookingLedger;
use crate::models::{
    Actor, Booking, ClassInstance, ClassStatus, ClassType, Equipment, EquipmentStatus, Role, User,
};
use crate::policy::StudioPolicy;
use crate::schedule::{ClassDraft, ClassPatch, ClassUpdate, Schedule};
use crate::store::{ChangeEvent, Repository};

#[derive(Clone)]
pub struct Studio {
    repo: Repository,
    directory: Directory,
    schedule: Schedule,
    ledger: BookingLedger,
    policy: StudioPolicy,
    clock: Arc<dyn Clock>,
}

impl Studio {
    pub fn new(repo: Repository, policy: StudioPolicy, clock: Arc<dyn Clock>) -> Self {
        let directory = Directory::new(repo.clone());
        let schedule = Schedule::new(repo.clone(), directory.clone(), policy.hours.clone());
        let ledger = BookingLedger::new(
            repo.clone(),
            directory.clone(),
            AllocationEngine::new(repo.clone()),
        );
        Self {
            repo,
            directory,
            schedule,
            ledger,
            policy,
            clock,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn ledger(&self) -> &BookingLedger {
        &self.ledger
    }

    pub fn policy(&self) -> &StudioPolicy {
        &self.policy
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.repo.subscribe()
    }

    pub fn actor(&self, user_id: &str) -> Result<Actor, BookingError> {
        let user = self.directory.get_user(user_id)?;
        if !user.is_active {
            return Err(BookingError::Forbidden(format!("user {user_id} is inactive")));
        }
        Ok(Actor::new(user.id, user.role))
    }

    fn require_admin(actor: &Actor) -> Result<(), BookingError> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(BookingError::Forbidden("admin role required".into()))
        }
    }

    /// Clients book for themselves; admins book on behalf of any client.
    pub fn book(
        &self,
        actor: &Actor,
        class_id: &str,
        client_id: Option<&str>,
        notes: Option<String>,
    ) -> Result<Booking, BookingError> {
        let client_id = match (actor.role, client_id) {
            (Role::Client, None) => actor.id.as_str(),
            (Role::Client, Some(id)) if id == actor.id => id,
            (Role::Admin, Some(id)) => id,
            (Role::Admin, None) => {
                return Err(BookingError::Validation(
                    "client_id is required when booking on behalf of a client".into(),
                ));
            }
            _ => return Err(BookingError::Forbidden("cannot book for another user".into())),
        };
        self.ledger.create_booking(
            class_id,
            client_id,
            notes,
            self.now(),
            self.policy.max_bookings_per_user,
        )
    }

    /// Clients may cancel their own bookings inside the notice window;
    /// admins may cancel any booking at any time.
    pub fn cancel(
        &self,
        actor: &Actor,
        booking_id: &str,
        reason: Option<String>,
    ) -> Result<bool, BookingError> {
        let booking = match self.ledger.get_booking(booking_id) {
            Ok(booking) => booking,
            Err(BookingError::NotFound { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };
        if !actor.is_admin() {
            if booking.client_id != actor.id {
                return Err(BookingError::Forbidden(
                    "clients may only cancel their own bookings".into(),
                ));
            }
            if !booking.status.is_active() {
                return Ok(false);
            }
            let class = self.schedule.get_class(&booking.class_id)?;
            if !self.policy.cancellation.can_cancel(&class, &booking, self.now()) {
                return Err(BookingError::PolicyViolation(format!(
                    "bookings can only be cancelled at least {} hours before the class starts",
                    self.policy.cancellation.notice().num_hours()
                )));
            }
        }
        self.ledger.cancel_booking(booking_id, reason)
    }

    pub fn can_cancel(&self, actor: &Actor, booking_id: &str) -> Result<bool, BookingError> {
        let booking = self.visible_booking(actor, booking_id)?;
        if actor.is_admin() {
            return Ok(booking.status.is_active());
        }
        if booking.client_id != actor.id {
            return Ok(false);
        }
        let class = self.schedule.get_class(&booking.class_id)?;
        Ok(booking.status.is_active()
            && self.policy.cancellation.can_cancel(&class, &booking, self.now()))
    }

    pub fn mark_paid(&self, actor: &Actor, booking_id: &str) -> Result<Booking, BookingError> {
        Self::require_admin(actor)?;
        self.ledger.mark_paid(booking_id)
    }

    pub fn visible_booking(&self, actor: &Actor, booking_id: &str) -> Result<Booking, BookingError> {
        let booking = self.ledger.get_booking(booking_id)?;
        let allowed = match actor.role {
            Role::Admin => true,
            Role::Client => booking.client_id == actor.id,
            Role::Instructor => self.schedule.get_class(&booking.class_id)?.instructor_id == actor.id,
        };
        if !allowed {
            return Err(BookingError::Forbidden("booking belongs to another client".into()));
        }
        Ok(booking)
    }

    pub fn bookings(&self, actor: &Actor, client_id: Option<&str>) -> Result<Vec<Booking>, BookingError> {
        match (actor.is_admin(), client_id) {
            (true, Some(id)) => self.ledger.bookings_for_client(id),
            (true, None) => self.ledger.list_bookings(),
            (false, Some(id)) if id != actor.id => {
                Err(BookingError::Forbidden("cannot list another user's bookings".into()))
            }
            (false, _) => self.ledger.bookings_for_client(&actor.id),
        }
    }

    pub fn class_bookings(&self, actor: &Actor, class_id: &str) -> Result<Vec<Booking>, BookingError> {
        let class = self.schedule.get_class(class_id)?;
        if !actor.is_admin() && class.instructor_id != actor.id {
            return Err(BookingError::Forbidden(
                "only admins and the class instructor can list its bookings".into(),
            ));
        }
        self.ledger.bookings_for_class(class_id)
    }

    pub fn create_class(&self, actor: &Actor, draft: ClassDraft) -> Result<ClassInstance, BookingError> {
        Self::require_admin(actor)?;
        self.schedule.create_class(draft)
    }

    pub fn update_class(
        &self,
        actor: &Actor,
        class_id: &str,
        patch: ClassPatch,
    ) -> Result<ClassUpdate, BookingError> {
        Self::require_admin(actor)?;
        let update = self.schedule.update_class(class_id, patch)?;
        self.ledger.apply_promotions(class_id, &update.promoted)?;
        Ok(update)
    }

    /// Changes the class lifecycle and carries the change over to its
    /// bookings.
    pub fn set_class_status(
        &self,
        actor: &Actor,
        class_id: &str,
        status: ClassStatus,
    ) -> Result<ClassInstance, BookingError> {
        Self::require_admin(actor)?;
        let class = self.schedule.set_class_status(class_id, status)?;
        match status {
            ClassStatus::Completed => {
                self.ledger.complete_class_bookings(class_id)?;
            }
            ClassStatus::Cancelled => {
                self.ledger.cancel_class_bookings(class_id, "class cancelled by the studio")?;
            }
            ClassStatus::Scheduled | ClassStatus::InProgress => {}
        }
        Ok(class)
    }

    pub fn delete_class(&self, actor: &Actor, class_id: &str) -> Result<ClassInstance, BookingError> {
        Self::require_admin(actor)?;
        let active = self
            .ledger
            .bookings_for_class(class_id)?
            .iter()
            .filter(|b| b.status.is_active())
            .count();
        if active > 0 {
            return Err(BookingError::InUse(format!(
                "class {class_id} still has {active} active bookings; cancel the class instead"
            )));
        }
        let class = self.schedule.set_class_status(class_id, ClassStatus::Cancelled)?;
        info!(class_id, "class withdrawn");
        Ok(class)
    }

    pub fn users(&self, actor: &Actor, role: Option<Role>) -> Result<Vec<User>, BookingError> {
        if actor.is_admin() {
            return self.directory.list_users(role);
        }
        match role {
            Some(Role::Instructor) => self.directory.list_users(Some(Role::Instructor)),
            _ => Err(BookingError::Forbidden(
                "only the instructor roster is visible to non-admins".into(),
            )),
        }
    }

    pub fn create_user(&self, actor: &Actor, new: NewUser) -> Result<User, BookingError> {
        Self::require_admin(actor)?;
        self.directory.create_user(new, self.today())
    }

    pub fn set_user_active(&self, actor: &Actor, user_id: &str, active: bool) -> Result<User, BookingError> {
        Self::require_admin(actor)?;
        self.directory.set_user_active(user_id, active)
    }

    pub fn create_equipment(&self, actor: &Actor, new: NewEquipment) -> Result<Equipment, BookingError> {
        Self::require_admin(actor)?;
        self.directory.create_equipment(new)
    }

    pub fn set_equipment_status(
        &self,
        actor: &Actor,
        equipment_id: &str,
        status: EquipmentStatus,
    ) -> Result<Equipment, BookingError> {
        Self::require_admin(actor)?;
        let serviced_on = (status == EquipmentStatus::Available).then(|| self.today());
        self.directory.set_equipment_status(equipment_id, status, serviced_on)
    }

    pub fn delete_equipment(&self, actor: &Actor, equipment_id: &str) -> Result<(), BookingError> {
        Self::require_admin(actor)?;
        self.directory.delete_equipment(equipment_id)
    }

    pub fn create_class_type(&self, actor: &Actor, new: NewClassType) -> Result<ClassType, BookingError> {
        Self::require_admin(actor)?;
        self.directory.create_class_type(new)
    }

    pub fn update_class_type(
        &self,
        actor: &Actor,
        class_type_id: &str,
        patch: ClassTypePatch,
    ) -> Result<ClassType, BookingError> {
        Self::require_admin(actor)?;
        self.directory.update_class_type(class_type_id, patch)
    }

    pub fn delete_class_type(&self, actor: &Actor, class_type_id: &str) -> Result<(), BookingError> {
        Self::require_admin(actor)?;
        self.directory.delete_class_type(class_type_id)
    }
}
