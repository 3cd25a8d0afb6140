//! In-memory appointment ledger.
//!
//! The store is the sole owner of appointment records; callers only ever get
//! clones. Every committed mutation emits exactly one
//! [`AppointmentChangeEvent`] into an unbounded channel so the webhook
//! forwarder can deliver it best-effort without ever blocking a mutation.
//!
//! No durability is claimed: the ledger lives and dies with the process.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::{AgentError, AgentResult};

/// One booked appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Opaque identity, assigned at creation, immutable.
    pub id: Uuid,
    /// Full name of the patient.
    pub name: String,
    /// Email address of the patient.
    pub email: String,
    /// Calendar date string, e.g. "2024-08-15".
    pub date: String,
    /// Free-text time of day, e.g. "10:30 AM".
    pub time: String,
    /// Name of the doctor.
    pub doctor: String,
    /// Location or name of the clinic.
    pub clinic: String,
}

/// Field values for a new appointment (everything but the id).
#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentFields {
    pub name: String,
    pub email: String,
    pub date: String,
    pub time: String,
    pub doctor: String,
    pub clinic: String,
}

/// Loose criteria for resolving an edit target.
///
/// `name` is always matched; `doctor` and `date` only narrow the result when
/// supplied. Name and doctor compare case-insensitively, date exactly.
#[derive(Debug, Clone, Default)]
pub struct MatchCriteria {
    pub name: String,
    pub doctor: Option<String>,
    pub date: Option<String>,
}

/// Per-field delta for an update.
///
/// Each field is a three-state decision collapsed to two: `None` or an empty
/// string both mean "keep the current value". Clearing a field is therefore
/// inexpressible; that limitation is inherited from the original system and
/// kept deliberately.
#[derive(Debug, Clone, Default)]
pub struct AppointmentUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub doctor: Option<String>,
    pub clinic: Option<String>,
}

impl AppointmentUpdate {
    fn apply(&self, current: &mut Appointment) {
        merge(&mut current.name, &self.name);
        merge(&mut current.email, &self.email);
        merge(&mut current.date, &self.date);
        merge(&mut current.time, &self.time);
        merge(&mut current.doctor, &self.doctor);
        merge(&mut current.clinic, &self.clinic);
    }
}

/// New value wins only when present and non-empty.
fn merge(current: &mut String, new: &Option<String>) {
    if let Some(value) = new
        && !value.is_empty()
    {
        *current = value.clone();
    }
}

/// Kind of committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    #[serde(rename = "appointment_created")]
    Created,
    #[serde(rename = "appointment_updated")]
    Updated,
    #[serde(rename = "appointment_deleted")]
    Deleted,
}

/// Notification of one committed mutation, handed to the webhook sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentChangeEvent {
    /// Event tag, serialized as `appointment_created` etc.
    pub event: ChangeKind,
    /// Snapshot of the record after the mutation (before, for deletes).
    pub payload: Appointment,
}

/// In-memory collection of appointments, insertion-ordered.
pub struct AppointmentStore {
    appointments: Vec<Appointment>,
    events: mpsc::UnboundedSender<AppointmentChangeEvent>,
}

impl AppointmentStore {
    /// Create an empty store and the receiving end of its change-event
    /// channel. The receiver is typically handed to
    /// [`crate::core::webhook::WebhookSink::spawn_forwarder`].
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AppointmentChangeEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                appointments: Vec::new(),
                events,
            },
            rx,
        )
    }

    /// Create a new appointment with a fresh unique id. Never fails.
    pub fn create(&mut self, fields: AppointmentFields) -> Appointment {
        let appointment = Appointment {
            id: Uuid::new_v4(),
            name: fields.name,
            email: fields.email,
            date: fields.date,
            time: fields.time,
            doctor: fields.doctor,
            clinic: fields.clinic,
        };
        self.appointments.push(appointment.clone());
        tracing::info!(id = %appointment.id, patient = %appointment.name, "appointment created");
        self.emit(ChangeKind::Created, appointment.clone());
        appointment
    }

    /// Return all appointments matching the criteria, insertion order
    /// preserved. Pure: never mutates the store.
    pub fn find_matches(&self, criteria: &MatchCriteria) -> Vec<Appointment> {
        self.appointments
            .iter()
            .filter(|appt| {
                if !appt.name.eq_ignore_ascii_case(&criteria.name) {
                    return false;
                }
                if let Some(ref doctor) = criteria.doctor
                    && !appt.doctor.eq_ignore_ascii_case(doctor)
                {
                    return false;
                }
                if let Some(ref date) = criteria.date
                    && appt.date != *date
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect()
    }

    /// Apply a partial update to the appointment with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NotFound`] if the id is absent.
    pub fn update(&mut self, id: Uuid, delta: &AppointmentUpdate) -> AgentResult<Appointment> {
        let appointment = self
            .appointments
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(AgentError::NotFound(id))?;
        delta.apply(appointment);
        let snapshot = appointment.clone();
        tracing::info!(id = %id, patient = %snapshot.name, "appointment updated");
        self.emit(ChangeKind::Updated, snapshot.clone());
        Ok(snapshot)
    }

    /// Remove and return the appointment with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NotFound`] if the id is absent.
    pub fn delete(&mut self, id: Uuid) -> AgentResult<Appointment> {
        let index = self
            .appointments
            .iter()
            .position(|a| a.id == id)
            .ok_or(AgentError::NotFound(id))?;
        let removed = self.appointments.remove(index);
        tracing::info!(id = %id, patient = %removed.name, "appointment deleted");
        self.emit(ChangeKind::Deleted, removed.clone());
        Ok(removed)
    }

    /// Snapshot of all appointments in insertion order.
    pub fn all(&self) -> Vec<Appointment> {
        self.appointments.clone()
    }

    /// Number of stored appointments.
    pub fn len(&self) -> usize {
        self.appointments.len()
    }

    /// True if the store holds no appointments.
    pub fn is_empty(&self) -> bool {
        self.appointments.is_empty()
    }

    fn emit(&self, kind: ChangeKind, payload: Appointment) {
        // The receiver may already be gone (no webhook configured and the
        // drain task finished); delivery is best-effort either way.
        let _ = self.events.send(AppointmentChangeEvent {
            event: kind,
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(name: &str, doctor: &str, date: &str) -> AppointmentFields {
        AppointmentFields {
            name: name.to_string(),
            email: "jane@example.com".to_string(),
            date: date.to_string(),
            time: "3 PM".to_string(),
            doctor: doctor.to_string(),
            clinic: "Downtown Clinic".to_string(),
        }
    }

    #[test]
    fn test_create_assigns_unique_ids() {
        let (mut store, _rx) = AppointmentStore::new();
        let a = store.create(fields("Jane Doe", "Dr. Smith", "2024-09-01"));
        let b = store.create(fields("Jane Doe", "Dr. Smith", "2024-09-01"));
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_find_matches_case_insensitive_insertion_order() {
        let (mut store, _rx) = AppointmentStore::new();
        let a = store.create(fields("Jane Doe", "Dr. A", "2024-09-01"));
        let b = store.create(fields("Jane Doe", "Dr. B", "2024-09-02"));
        let c = store.create(fields("Jane Doe", "Dr. C", "2024-09-03"));
        store.create(fields("John Roe", "Dr. A", "2024-09-01"));

        let matches = store.find_matches(&MatchCriteria {
            name: "jane doe".to_string(),
            ..Default::default()
        });
        assert_eq!(
            matches.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![a.id, b.id, c.id]
        );
    }

    #[test]
    fn test_find_matches_narrowed_by_doctor_and_date() {
        let (mut store, _rx) = AppointmentStore::new();
        store.create(fields("Jane Doe", "Dr. A", "2024-09-01"));
        let b = store.create(fields("Jane Doe", "Dr. B", "2024-09-02"));

        let matches = store.find_matches(&MatchCriteria {
            name: "Jane Doe".to_string(),
            doctor: Some("dr. b".to_string()),
            date: None,
        });
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, b.id);

        let none = store.find_matches(&MatchCriteria {
            name: "Jane Doe".to_string(),
            doctor: None,
            date: Some("2024-12-31".to_string()),
        });
        assert!(none.is_empty());
    }

    #[test]
    fn test_update_merges_only_present_fields() {
        let (mut store, _rx) = AppointmentStore::new();
        let original = store.create(fields("Jane Doe", "Dr. Smith", "2024-09-01"));

        let updated = store
            .update(
                original.id,
                &AppointmentUpdate {
                    time: Some("4 PM".to_string()),
                    email: Some(String::new()), // empty keeps the old value
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.time, "4 PM");
        assert_eq!(updated.name, original.name);
        assert_eq!(updated.email, original.email);
        assert_eq!(updated.date, original.date);
        assert_eq!(updated.doctor, original.doctor);
        assert_eq!(updated.clinic, original.clinic);
    }

    #[test]
    fn test_update_unknown_id_fails() {
        let (mut store, _rx) = AppointmentStore::new();
        let err = store
            .update(Uuid::new_v4(), &AppointmentUpdate::default())
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[test]
    fn test_delete_returns_removed_record() {
        let (mut store, _rx) = AppointmentStore::new();
        let a = store.create(fields("Jane Doe", "Dr. Smith", "2024-09-01"));
        let removed = store.delete(a.id).unwrap();
        assert_eq!(removed, a);
        assert!(store.is_empty());
        assert!(store.delete(a.id).is_err());
    }

    #[test]
    fn test_each_mutation_emits_one_event() {
        let (mut store, mut rx) = AppointmentStore::new();
        let a = store.create(fields("Jane Doe", "Dr. Smith", "2024-09-01"));
        store
            .update(
                a.id,
                &AppointmentUpdate {
                    time: Some("4 PM".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        store.delete(a.id).unwrap();

        let created = rx.try_recv().unwrap();
        assert_eq!(created.event, ChangeKind::Created);
        let updated = rx.try_recv().unwrap();
        assert_eq!(updated.event, ChangeKind::Updated);
        assert_eq!(updated.payload.time, "4 PM");
        let deleted = rx.try_recv().unwrap();
        assert_eq!(deleted.event, ChangeKind::Deleted);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_change_event_serialization() {
        let (mut store, mut rx) = AppointmentStore::new();
        store.create(fields("Jane Doe", "Dr. Smith", "2024-09-01"));
        let event = rx.try_recv().unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "appointment_created");
        assert_eq!(json["payload"]["name"], "Jane Doe");
    }
}
