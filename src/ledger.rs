use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::allocation::AllocationEngine;
use crate::directory::Directory;
use crate::error::BookingError;
use crate::models::{
    Booking, BookingStatus, ClassInstance, Id, PaymentStatus, Role, new_id,
};
use crate::store::{EntityKind, Repository, Step};

#[derive(Clone)]
pub struct BookingLedger {
    repo: Repository,
    directory: Directory,
    engine: AllocationEngine,
    lock: Arc<Mutex<()>>,
}

impl BookingLedger {
    pub fn new(repo: Repository, directory: Directory, engine: AllocationEngine) -> Self {
        Self {
            repo,
            directory,
            engine,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // the guarded data is `()`, a poisoned lock carries no broken state
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bookings(&self) -> Result<Vec<Booking>, BookingError> {
        Ok(self.repo.load_all::<Booking>(EntityKind::Bookings)?.items)
    }

    fn class(&self, class_id: &str) -> Result<ClassInstance, BookingError> {
        self.repo
            .load_all::<ClassInstance>(EntityKind::ClassInstances)?
            .items
            .into_iter()
            .find(|c| c.id == class_id)
            .ok_or_else(|| BookingError::not_found("class", class_id))
    }

    /// Books `client_id` into the class, confirmed while places remain and
    /// waiting afterwards. `max_active` caps the client's active bookings on
    /// classes that have not started yet.
    pub fn create_booking(
        &self,
        class_id: &str,
        client_id: &str,
        notes: Option<String>,
        now: NaiveDateTime,
        max_active: Option<u32>,
    ) -> Result<Booking, BookingError> {
        let _guard = self.guard();

        let class = self.class(class_id)?;
        if !class.is_bookable() || class.starts_at() <= now {
            return Err(BookingError::NotBookable {
                class_id: class.id,
                status: class.status,
            });
        }
        self.directory.require_active(client_id, Role::Client)?;

        let bookings = self.bookings()?;
        if bookings.iter().any(|b| {
            b.class_id == class_id && b.client_id == client_id && b.status != BookingStatus::Cancelled
        }) {
            return Err(BookingError::AlreadyBooked {
                class_id: class_id.to_string(),
                client_id: client_id.to_string(),
            });
        }
        if let Some(limit) = max_active {
            let upcoming: HashSet<Id> = self
                .repo
                .load_all::<ClassInstance>(EntityKind::ClassInstances)?
                .items
                .into_iter()
                .filter(|c| c.starts_at() > now)
                .map(|c| c.id)
                .collect();
            let active = bookings
                .iter()
                .filter(|b| {
                    b.client_id == client_id
                        && b.status.is_active()
                        && upcoming.contains(&b.class_id)
                })
                .count();
            if active >= limit as usize {
                return Err(BookingError::PolicyViolation(format!(
                    "client {client_id} already holds {active} active bookings (limit {limit})"
                )));
            }
        }

        let outcome = self.engine.add_participant(class_id, client_id)?;
        let booking = Booking {
            id: new_id(),
            class_id: class_id.to_string(),
            client_id: client_id.to_string(),
            booking_date: now,
            status: if outcome.confirmed {
                BookingStatus::Confirmed
            } else {
                BookingStatus::Waiting
            },
            payment_status: PaymentStatus::Pending,
            notes,
            cancellation_reason: None,
        };

        let stored = self
            .repo
            .transact::<Booking, _, BookingError, _>(EntityKind::Bookings, |items| {
                items.push(booking.clone());
                Ok(Step::Commit(()))
            });
        if let Err(err) = stored {
            warn!(class_id, client_id, error = %err, "booking not recorded, releasing place");
            let released = self.engine.remove_participant(class_id, client_id)?;
            if let Some(promoted) = released.promoted {
                self.flip_promoted(class_id, std::slice::from_ref(&promoted))?;
            }
            return Err(err);
        }

        info!(
            booking_id = %booking.id,
            class_id,
            client_id,
            status = ?booking.status,
            "booking created"
        );
        Ok(booking)
    }

    /// Returns `false` when the booking does not exist or no longer holds a
    /// place. Otherwise the client leaves the class and the promoted client,
    /// if any, has their waiting booking confirmed.
    pub fn cancel_booking(&self, booking_id: &str, reason: Option<String>) -> Result<bool, BookingError> {
        let _guard = self.guard();

        let Some(booking) = self.bookings()?.into_iter().find(|b| b.id == booking_id) else {
            return Ok(false);
        };
        if !booking.status.is_active() {
            return Ok(false);
        }

        let outcome = self
            .engine
            .remove_participant(&booking.class_id, &booking.client_id)?;
        if !outcome.removed() {
            warn!(
                booking_id,
                class_id = %booking.class_id,
                "booking held no place on the class"
            );
        }

        let recorded = self
            .repo
            .transact::<Booking, _, BookingError, _>(EntityKind::Bookings, |items| {
                let Some(target) = items.iter_mut().find(|b| b.id == booking_id) else {
                    return Err(BookingError::not_found("booking", booking_id));
                };
                target.status = BookingStatus::Cancelled;
                target.cancellation_reason = reason.clone();
                if let Some(promoted) = &outcome.promoted {
                    confirm_waiting(items, &booking.class_id, std::slice::from_ref(promoted));
                }
                Ok(Step::Commit(()))
            });
        if let Err(err) = recorded {
            warn!(booking_id, error = %err, "cancellation not recorded, restoring class lists");
            self.engine
                .reinstate_participant(&booking.class_id, &booking.client_id, &outcome)?;
            return Err(err);
        }

        info!(
            booking_id,
            class_id = %booking.class_id,
            promoted = ?outcome.promoted,
            "booking cancelled"
        );
        Ok(true)
    }

    pub fn apply_promotions(&self, class_id: &str, promoted: &[Id]) -> Result<(), BookingError> {
        if promoted.is_empty() {
            return Ok(());
        }
        let _guard = self.guard();
        self.flip_promoted(class_id, promoted)
    }

    fn flip_promoted(&self, class_id: &str, promoted: &[Id]) -> Result<(), BookingError> {
        self.repo
            .transact::<Booking, _, BookingError, _>(EntityKind::Bookings, |items| {
                confirm_waiting(items, class_id, promoted);
                Ok(Step::Commit(()))
            })
    }

    pub fn mark_paid(&self, booking_id: &str) -> Result<Booking, BookingError> {
        let booking = self
            .repo
            .transact::<Booking, _, BookingError, _>(EntityKind::Bookings, |items| {
                let booking = items
                    .iter_mut()
                    .find(|b| b.id == booking_id)
                    .ok_or_else(|| BookingError::not_found("booking", booking_id))?;
                match (booking.status, booking.payment_status) {
                    (_, PaymentStatus::Paid) => Ok(Step::Skip(booking.clone())),
                    (BookingStatus::Cancelled, _) | (_, PaymentStatus::Refunded) => {
                        Err(BookingError::Validation(format!(
                            "booking {booking_id} is {:?} and cannot be paid",
                            booking.status
                        )))
                    }
                    _ => {
                        booking.payment_status = PaymentStatus::Paid;
                        Ok(Step::Commit(booking.clone()))
                    }
                }
            })?;
        info!(booking_id, "booking paid");
        Ok(booking)
    }

    pub fn complete_class_bookings(&self, class_id: &str) -> Result<usize, BookingError> {
        let _guard = self.guard();
        let changed = self
            .repo
            .transact::<Booking, _, BookingError, _>(EntityKind::Bookings, |items| {
                let mut changed = 0;
                for booking in items.iter_mut().filter(|b| b.class_id == class_id) {
                    match booking.status {
                        BookingStatus::Confirmed => booking.status = BookingStatus::Completed,
                        BookingStatus::Waiting => {
                            booking.status = BookingStatus::Cancelled;
                            booking.cancellation_reason = Some("class completed".into());
                        }
                        _ => continue,
                    }
                    changed += 1;
                }
                Ok(if changed == 0 {
                    Step::Skip(0)
                } else {
                    Step::Commit(changed)
                })
            })?;
        info!(class_id, changed, "class bookings completed");
        Ok(changed)
    }

    pub fn cancel_class_bookings(&self, class_id: &str, reason: &str) -> Result<usize, BookingError> {
        let _guard = self.guard();
        let changed = self
            .repo
            .transact::<Booking, _, BookingError, _>(EntityKind::Bookings, |items| {
                let mut changed = 0;
                for booking in items
                    .iter_mut()
                    .filter(|b| b.class_id == class_id && b.status.is_active())
                {
                    booking.status = BookingStatus::Cancelled;
                    booking.cancellation_reason = Some(reason.to_string());
                    if booking.payment_status == PaymentStatus::Paid {
                        booking.payment_status = PaymentStatus::Refunded;
                    }
                    changed += 1;
                }
                Ok(if changed == 0 {
                    Step::Skip(0)
                } else {
                    Step::Commit(changed)
                })
            })?;
        info!(class_id, changed, "class bookings cancelled");
        Ok(changed)
    }

    pub fn get_booking(&self, id: &str) -> Result<Booking, BookingError> {
        self.bookings()?
            .into_iter()
            .find(|b| b.id == id)
            .ok_or_else(|| BookingError::not_found("booking", id))
    }

    pub fn list_bookings(&self) -> Result<Vec<Booking>, BookingError> {
        self.bookings()
    }

    pub fn bookings_for_client(&self, client_id: &str) -> Result<Vec<Booking>, BookingError> {
        Ok(self
            .bookings()?
            .into_iter()
            .filter(|b| b.client_id == client_id)
            .collect())
    }

    pub fn bookings_for_class(&self, class_id: &str) -> Result<Vec<Booking>, BookingError> {
        Ok(self
            .bookings()?
            .into_iter()
            .filter(|b| b.class_id == class_id)
            .collect())
    }
}

fn confirm_waiting(items: &mut [Booking], class_id: &str, promoted: &[Id]) {
    for client_id in promoted {
        match items.iter_mut().find(|b| {
            b.class_id == class_id && b.client_id == *client_id && b.status == BookingStatus::Waiting
        }) {
            Some(booking) => booking.status = BookingStatus::Confirmed,
            None => warn!(class_id, client_id = %client_id, "promoted client has no waiting booking"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::{Duration, NaiveDate};
    use serde_json::Value;

    use super::*;
    use crate::directory::NewUser;
    use crate::models::ClassStatus;
    use crate::store::{Backend, MemoryBackend, StoreError, Versioned};

    #[derive(Default)]
    struct FailingBookings {
        inner: MemoryBackend,
        fail: AtomicBool,
    }

    impl Backend for FailingBookings {
        fn load(&self, kind: EntityKind) -> Result<Versioned<Value>, StoreError> {
            self.inner.load(kind)
        }

        fn save(&self, kind: EntityKind, expected: u64, value: Value) -> Result<u64, StoreError> {
            if kind == EntityKind::Bookings && self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            self.inner.save(kind, expected, value)
        }
    }

    struct Fixture {
        ledger: BookingLedger,
        repo: Repository,
        clients: Vec<Id>,
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 20)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn class(id: &str, max: u32, start: NaiveDateTime) -> ClassInstance {
        ClassInstance {
            id: id.into(),
            class_type_id: "mat".into(),
            instructor_id: "ines".into(),
            date: start.date(),
            time: start.time(),
            duration_min: 55,
            equipment_id: "bed-1".into(),
            max_participants: max,
            current_participants: vec![],
            waiting_list: vec![],
            status: ClassStatus::Scheduled,
            notes: None,
            price: 15.0,
        }
    }

    fn fixture(classes: &[ClassInstance]) -> Fixture {
        fixture_on(Arc::new(MemoryBackend::new()), classes)
    }

    fn fixture_on(backend: Arc<dyn Backend>, classes: &[ClassInstance]) -> Fixture {
        let repo = Repository::new(backend, 5);
        let directory = Directory::new(repo.clone());
        let clients = ["ana", "bea", "carla"]
            .iter()
            .map(|name| {
                directory
                    .create_user(
                        NewUser {
                            email: format!("{name}@studio.es"),
                            name: name.to_string(),
                            role: Role::Client,
                            phone: None,
                            specialties: vec![],
                            experience: None,
                            certifications: vec![],
                            membership: None,
                            level: None,
                        },
                        now().date(),
                    )
                    .unwrap()
                    .id
            })
            .collect();
        repo.save_all(EntityKind::ClassInstances, 0, classes).unwrap();
        let ledger = BookingLedger::new(
            repo.clone(),
            directory,
            AllocationEngine::new(repo.clone()),
        );
        Fixture {
            ledger,
            repo,
            clients,
        }
    }

    fn tomorrow() -> NaiveDateTime {
        now() + Duration::days(1)
    }

    fn stored_class(repo: &Repository, id: &str) -> ClassInstance {
        repo.load_all::<ClassInstance>(EntityKind::ClassInstances)
            .unwrap()
            .items
            .into_iter()
            .find(|c| c.id == id)
            .unwrap()
    }

    #[test]
    fn test_failed_cancellation_write_restores_class_lists() {
        let backend = Arc::new(FailingBookings::default());
        let f = fixture_on(backend.clone(), &[class("x", 1, tomorrow())]);
        let (ana, bea) = (f.clients[0].clone(), f.clients[1].clone());
        let a = f.ledger.create_booking("x", &ana, None, now(), None).unwrap();
        let b = f.ledger.create_booking("x", &bea, None, now(), None).unwrap();

        backend.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            f.ledger.cancel_booking(&a.id, None),
            Err(BookingError::Storage(_))
        ));

        let stored = stored_class(&f.repo, "x");
        assert_eq!(stored.current_participants, vec![ana]);
        assert_eq!(stored.waiting_list, vec![bea]);
        assert_eq!(f.ledger.get_booking(&a.id).unwrap().status, BookingStatus::Confirmed);
        assert_eq!(f.ledger.get_booking(&b.id).unwrap().status, BookingStatus::Waiting);

        backend.fail.store(false, Ordering::SeqCst);
        assert!(f.ledger.cancel_booking(&a.id, None).unwrap());
        assert_eq!(f.ledger.get_booking(&b.id).unwrap().status, BookingStatus::Confirmed);
    }

    #[test]
    fn test_cancellation_promotes_waiting_booking() {
        let f = fixture(&[class("x", 1, tomorrow())]);
        let (a, b) = (&f.clients[0], &f.clients[1]);

        let first = f.ledger.create_booking("x", a, None, now(), None).unwrap();
        let second = f.ledger.create_booking("x", b, None, now(), None).unwrap();
        assert_eq!(first.status, BookingStatus::Confirmed);
        assert_eq!(second.status, BookingStatus::Waiting);
        assert_eq!(first.payment_status, PaymentStatus::Pending);

        assert!(f
            .ledger
            .cancel_booking(&first.id, Some("sick".into()))
            .unwrap());

        let first = f.ledger.get_booking(&first.id).unwrap();
        assert_eq!(first.status, BookingStatus::Cancelled);
        assert_eq!(first.cancellation_reason.as_deref(), Some("sick"));
        assert_eq!(
            f.ledger.get_booking(&second.id).unwrap().status,
            BookingStatus::Confirmed
        );
        let x = stored_class(&f.repo, "x");
        assert_eq!(x.current_participants, vec![b.clone()]);
        assert!(x.waiting_list.is_empty());
    }

    #[test]
    fn test_double_booking_is_rejected() {
        let f = fixture(&[class("x", 2, tomorrow())]);
        let a = &f.clients[0];
        f.ledger.create_booking("x", a, None, now(), None).unwrap();
        assert!(matches!(
            f.ledger.create_booking("x", a, None, now(), None),
            Err(BookingError::AlreadyBooked { .. })
        ));
        assert_eq!(f.ledger.bookings_for_class("x").unwrap().len(), 1);
        assert_eq!(stored_class(&f.repo, "x").current_participants.len(), 1);
    }

    #[test]
    fn test_rebooking_after_cancellation_is_allowed() {
        let f = fixture(&[class("x", 2, tomorrow())]);
        let a = &f.clients[0];
        let booking = f.ledger.create_booking("x", a, None, now(), None).unwrap();
        f.ledger.cancel_booking(&booking.id, None).unwrap();
        assert!(f.ledger.create_booking("x", a, None, now(), None).is_ok());
    }

    #[test]
    fn test_cancel_missing_or_cancelled_returns_false() {
        let f = fixture(&[class("x", 2, tomorrow())]);
        assert!(!f.ledger.cancel_booking("nope", None).unwrap());
        let booking = f
            .ledger
            .create_booking("x", &f.clients[0], None, now(), None)
            .unwrap();
        assert!(f.ledger.cancel_booking(&booking.id, None).unwrap());
        assert!(!f.ledger.cancel_booking(&booking.id, None).unwrap());
    }

    #[test]
    fn test_unbookable_classes() {
        let mut cancelled = class("gone", 2, tomorrow());
        cancelled.status = ClassStatus::Cancelled;
        let past = class("past", 2, now() - Duration::hours(1));
        let f = fixture(&[cancelled, past]);
        let a = &f.clients[0];
        assert!(matches!(
            f.ledger.create_booking("gone", a, None, now(), None),
            Err(BookingError::NotBookable {
                status: ClassStatus::Cancelled,
                ..
            })
        ));
        assert!(matches!(
            f.ledger.create_booking("past", a, None, now(), None),
            Err(BookingError::NotBookable { .. })
        ));
        assert!(matches!(
            f.ledger.create_booking("missing", a, None, now(), None),
            Err(BookingError::NotFound { .. })
        ));
    }

    #[test]
    fn test_booking_limit_counts_upcoming_active_bookings() {
        let f = fixture(&[
            class("x", 1, tomorrow()),
            class("y", 1, tomorrow() + Duration::hours(2)),
            class("z", 1, tomorrow() + Duration::hours(4)),
        ]);
        let a = &f.clients[0];
        f.ledger.create_booking("x", a, None, now(), Some(2)).unwrap();
        f.ledger.create_booking("y", a, None, now(), Some(2)).unwrap();
        assert!(matches!(
            f.ledger.create_booking("z", a, None, now(), Some(2)),
            Err(BookingError::PolicyViolation(_))
        ));
        assert!(f.ledger.create_booking("z", a, None, now(), None).is_ok());
    }

    #[test]
    fn test_only_active_clients_can_book() {
        let f = fixture(&[class("x", 1, tomorrow())]);
        assert!(matches!(
            f.ledger.create_booking("x", "ghost", None, now(), None),
            Err(BookingError::NotFound { .. })
        ));
    }

    #[test]
    fn test_payment_and_class_cascades() {
        let f = fixture(&[class("x", 1, tomorrow()), class("y", 1, tomorrow())]);
        let (a, b) = (&f.clients[0], &f.clients[1]);
        let paid = f.ledger.create_booking("x", a, None, now(), None).unwrap();
        let waiting = f.ledger.create_booking("x", b, None, now(), None).unwrap();
        assert_eq!(
            f.ledger.mark_paid(&paid.id).unwrap().payment_status,
            PaymentStatus::Paid
        );

        assert_eq!(f.ledger.cancel_class_bookings("x", "studio closed").unwrap(), 2);
        let refunded = f.ledger.get_booking(&paid.id).unwrap();
        assert_eq!(refunded.status, BookingStatus::Cancelled);
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
        assert_eq!(
            f.ledger.get_booking(&waiting.id).unwrap().status,
            BookingStatus::Cancelled
        );
        assert!(f.ledger.mark_paid(&waiting.id).is_err());

        let attended = f.ledger.create_booking("y", a, None, now(), None).unwrap();
        let queued = f.ledger.create_booking("y", b, None, now(), None).unwrap();
        assert_eq!(f.ledger.complete_class_bookings("y").unwrap(), 2);
        assert_eq!(
            f.ledger.get_booking(&attended.id).unwrap().status,
            BookingStatus::Completed
        );
        assert_eq!(
            f.ledger.get_booking(&queued.id).unwrap().status,
            BookingStatus::Cancelled
        );
        assert_eq!(f.ledger.bookings_for_client(a).unwrap().len(), 2);
    }
}
