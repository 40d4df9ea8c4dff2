use std::collections::HashSet;

use tracing::{error, info};

use crate::error::BookingError;
use crate::models::{ClassInstance, ClassStatus, Id};
use crate::store::{EntityKind, Repository, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// `true` when the client holds a confirmed place, `false` when waiting.
    pub confirmed: bool,
    /// The client was already on one of the lists; nothing changed.
    pub already_present: bool,
}

/// Position a withdrawn client held before leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Confirmed(usize),
    Waiting(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub slot: Option<Slot>,
    /// Head of the waiting list moved into the freed place.
    pub promoted: Option<Id>,
}

pub fn check_invariants(class: &ClassInstance) -> Result<(), BookingError> {
    if class.current_participants.len() > class.max_participants as usize {
        return Err(BookingError::CapacityInvariantViolation {
            class_id: class.id.clone(),
            detail: format!(
                "{} confirmed participants exceed capacity {}",
                class.current_participants.len(),
                class.max_participants
            ),
        });
    }
    let mut seen = HashSet::new();
    for client in class.current_participants.iter().chain(&class.waiting_list) {
        if !seen.insert(client.as_str()) {
            return Err(BookingError::CapacityInvariantViolation {
                class_id: class.id.clone(),
                detail: format!("client {client} appears more than once"),
            });
        }
    }
    Ok(())
}

fn guarded(class: &ClassInstance) -> Result<(), BookingError> {
    check_invariants(class).inspect_err(|err| error!("Refusing participant update: {err}"))
}

pub fn admit(class: &mut ClassInstance, client_id: &str) -> Result<AddOutcome, BookingError> {
    if class.is_confirmed(client_id) || class.is_waiting(client_id) {
        return Ok(AddOutcome {
            confirmed: class.is_confirmed(client_id),
            already_present: true,
        });
    }
    let confirmed = !class.is_full();
    if confirmed {
        class.current_participants.push(client_id.to_string());
    } else {
        class.waiting_list.push(client_id.to_string());
    }
    guarded(class)?;
    Ok(AddOutcome {
        confirmed,
        already_present: false,
    })
}

/// Drop the client from whichever list holds them. A freed confirmed place
/// is refilled from the head of the waiting list in the same step.
pub fn withdraw(class: &mut ClassInstance, client_id: &str) -> Result<RemoveOutcome, BookingError> {
    if let Some(pos) = class.current_participants.iter().position(|c| c == client_id) {
        class.current_participants.remove(pos);
        let promoted = backfill(class)?.into_iter().next();
        return Ok(RemoveOutcome {
            slot: Some(Slot::Confirmed(pos)),
            promoted,
        });
    }
    if let Some(pos) = class.waiting_list.iter().position(|c| c == client_id) {
        class.waiting_list.remove(pos);
        guarded(class)?;
        return Ok(RemoveOutcome {
            slot: Some(Slot::Waiting(pos)),
            promoted: None,
        });
    }
    Ok(RemoveOutcome {
        slot: None,
        promoted: None,
    })
}

impl RemoveOutcome {
    pub fn removed(&self) -> bool {
        self.slot.is_some()
    }
}

/// Undoes a `withdraw`: the promoted client returns to the head of the
/// waiting list and the withdrawn client to their old slot.
pub fn reinstate(
    class: &mut ClassInstance,
    client_id: &str,
    outcome: &RemoveOutcome,
) -> Result<(), BookingError> {
    if class.is_confirmed(client_id) || class.is_waiting(client_id) {
        return Ok(());
    }
    if let Some(promoted) = &outcome.promoted {
        if let Some(pos) = class.current_participants.iter().position(|c| c == promoted) {
            class.current_participants.remove(pos);
            class.waiting_list.insert(0, promoted.clone());
        }
    }
    match outcome.slot {
        Some(Slot::Confirmed(pos)) => {
            let pos = pos.min(class.current_participants.len());
            class.current_participants.insert(pos, client_id.to_string());
        }
        Some(Slot::Waiting(pos)) => {
            let pos = pos.min(class.waiting_list.len());
            class.waiting_list.insert(pos, client_id.to_string());
        }
        None => {}
    }
    guarded(class)
}

/// Empties the lists a finished class no longer needs: the waiting list on
/// completion, both lists on cancellation. Returns the released clients.
pub fn close(class: &mut ClassInstance, status: ClassStatus) -> Vec<Id> {
    let mut released = Vec::new();
    if status == ClassStatus::Cancelled {
        released.append(&mut class.current_participants);
    }
    if status.is_terminal() {
        released.append(&mut class.waiting_list);
    }
    released
}

pub fn backfill(class: &mut ClassInstance) -> Result<Vec<Id>, BookingError> {
    let mut promoted = Vec::new();
    while !class.is_full() && !class.waiting_list.is_empty() {
        let next = class.waiting_list.remove(0);
        class.current_participants.push(next.clone());
        promoted.push(next);
    }
    guarded(class)?;
    Ok(promoted)
}

/// Change capacity; never below the number of confirmed participants.
pub fn resize(class: &mut ClassInstance, max_participants: u32) -> Result<Vec<Id>, BookingError> {
    if max_participants == 0 {
        return Err(BookingError::Validation(
            "max_participants must be greater than 0".into(),
        ));
    }
    if (max_participants as usize) < class.current_participants.len() {
        return Err(BookingError::Validation(format!(
            "capacity {max_participants} is below the {} confirmed participants",
            class.current_participants.len()
        )));
    }
    class.max_participants = max_participants;
    backfill(class)
}

pub(crate) fn find_mut<'a>(
    classes: &'a mut [ClassInstance],
    class_id: &str,
) -> Result<&'a mut ClassInstance, BookingError> {
    classes
        .iter_mut()
        .find(|c| c.id == class_id)
        .ok_or_else(|| BookingError::not_found("class", class_id))
}

#[derive(Clone)]
pub struct AllocationEngine {
    repo: Repository,
}

impl AllocationEngine {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub fn add_participant(
        &self,
        class_id: &str,
        client_id: &str,
    ) -> Result<AddOutcome, BookingError> {
        let outcome = self
            .repo
            .transact::<ClassInstance, _, BookingError, _>(EntityKind::ClassInstances, |classes| {
                let class = find_mut(classes, class_id)?;
                let outcome = admit(class, client_id)?;
                Ok(if outcome.already_present {
                    Step::Skip(outcome)
                } else {
                    Step::Commit(outcome)
                })
            })?;
        if !outcome.already_present {
            info!(class_id, client_id, confirmed = outcome.confirmed, "participant added");
        }
        Ok(outcome)
    }

    pub fn remove_participant(
        &self,
        class_id: &str,
        client_id: &str,
    ) -> Result<RemoveOutcome, BookingError> {
        let outcome = self
            .repo
            .transact::<ClassInstance, _, BookingError, _>(EntityKind::ClassInstances, |classes| {
                let class = find_mut(classes, class_id)?;
                let outcome = withdraw(class, client_id)?;
                Ok(if outcome.removed() {
                    Step::Commit(outcome)
                } else {
                    Step::Skip(outcome)
                })
            })?;
        if outcome.removed() {
            info!(class_id, client_id, promoted = ?outcome.promoted, "participant removed");
        }
        Ok(outcome)
    }

    pub fn reinstate_participant(
        &self,
        class_id: &str,
        client_id: &str,
        outcome: &RemoveOutcome,
    ) -> Result<(), BookingError> {
        if !outcome.removed() {
            return Ok(());
        }
        self.repo
            .transact::<ClassInstance, _, BookingError, _>(EntityKind::ClassInstances, |classes| {
                reinstate(find_mut(classes, class_id)?, client_id, outcome)?;
                Ok(Step::Commit(()))
            })?;
        info!(class_id, client_id, "participant reinstated");
        Ok(())
    }
}
