//! Backend function calls and the intent dispatcher.
//!
//! The backend issues structured function calls for the two declared
//! intents. The dispatcher translates one call into a store mutation and a
//! human-readable result string that is fed back to the backend so it can
//! relay it to the user; the result is never surfaced to the UI as raw data.
//!
//! Edit resolution is a three-way branch and is deliberate: zero matches and
//! ambiguous matches both produce a message and no mutation. The dispatcher
//! never guesses when loose criteria fit more than one appointment.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::appointments::{
    AppointmentFields, AppointmentStore, AppointmentUpdate, MatchCriteria,
};

/// One function declaration registered with the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    /// Function name, the dispatch tag.
    pub name: String,
    /// Description shown to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the parameter object.
    pub parameters: serde_json::Value,
}

/// A backend-issued request to execute one declared intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Call identifier, echoed back in the tool response. The text path
    /// carries no ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Closed set of intents the agent executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Book,
    Edit,
}

impl Intent {
    /// Map a wire tag to an intent. Unknown tags are rejected, never
    /// silently ignored.
    pub fn from_tag(name: &str) -> Option<Self> {
        match name {
            "bookAppointment" => Some(Intent::Book),
            "editAppointment" => Some(Intent::Edit),
            _ => None,
        }
    }
}

/// Arguments of an `editAppointment` call. `patient_name` identifies the
/// target; `doctor_name`/`current_date` narrow the match; the `new_*`
/// fields are the delta.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditArgs {
    pub patient_name: String,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub current_date: Option<String>,
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub new_email: Option<String>,
    #[serde(default)]
    pub new_date: Option<String>,
    #[serde(default)]
    pub new_time: Option<String>,
    #[serde(default)]
    pub new_doctor: Option<String>,
    #[serde(default)]
    pub new_clinic: Option<String>,
}

impl EditArgs {
    fn criteria(&self) -> MatchCriteria {
        MatchCriteria {
            name: self.patient_name.clone(),
            doctor: self.doctor_name.clone().filter(|d| !d.is_empty()),
            date: self.current_date.clone().filter(|d| !d.is_empty()),
        }
    }

    fn delta(&self) -> AppointmentUpdate {
        AppointmentUpdate {
            name: self.new_name.clone(),
            email: self.new_email.clone(),
            date: self.new_date.clone(),
            time: self.new_time.clone(),
            doctor: self.new_doctor.clone(),
            clinic: self.new_clinic.clone(),
        }
    }
}

/// The two fixed function declarations, in registration order.
pub fn declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: "bookAppointment".to_string(),
            description: None,
            parameters: json!({
                "type": "OBJECT",
                "description": "Validates and books a doctor appointment with the provided details.",
                "properties": {
                    "name": { "type": "STRING", "description": "Full name of the patient." },
                    "email": { "type": "STRING", "description": "Email address of the patient." },
                    "date": { "type": "STRING", "description": "The desired date of the appointment, e.g., \"2024-08-15\"." },
                    "time": { "type": "STRING", "description": "The desired time of the appointment, e.g., \"10:30 AM\"." },
                    "doctor": { "type": "STRING", "description": "The name of the doctor." },
                    "clinic": { "type": "STRING", "description": "The location or name of the clinic." }
                },
                "required": ["name", "email", "date", "time", "doctor", "clinic"]
            }),
        },
        FunctionDeclaration {
            name: "editAppointment".to_string(),
            description: Some(
                "Updates an existing doctor appointment with new details. To identify the \
                 appointment, you must provide the patient's name. You can also provide the \
                 doctor's name or the current appointment date for more specific matching."
                    .to_string(),
            ),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "patientName": { "type": "STRING", "description": "The name of the patient whose appointment is to be edited." },
                    "doctorName": { "type": "STRING", "description": "(Optional) The name of the doctor for the appointment to be edited, for more specific matching." },
                    "currentDate": { "type": "STRING", "description": "(Optional) The current date of the appointment to be edited (YYYY-MM-DD), for more specific matching." },
                    "newName": { "type": "STRING", "description": "(Optional) The new name for the patient." },
                    "newEmail": { "type": "STRING", "description": "(Optional) The new email address for the patient." },
                    "newDate": { "type": "STRING", "description": "(Optional) The new date for the appointment, e.g., '2024-08-16'." },
                    "newTime": { "type": "STRING", "description": "(Optional) The new time for the appointment, e.g., '03:00 PM'." },
                    "newDoctor": { "type": "STRING", "description": "(Optional) The new doctor's name." },
                    "newClinic": { "type": "STRING", "description": "(Optional) The new clinic location or name." }
                },
                "required": ["patientName"]
            }),
        },
    ]
}

/// Interprets backend function calls against the appointment store.
///
/// Mutations happen synchronously under one lock acquisition, so matching
/// and the subsequent update see a single atomic view of the store.
#[derive(Clone)]
pub struct IntentDispatcher {
    store: Arc<Mutex<AppointmentStore>>,
}

impl IntentDispatcher {
    pub fn new(store: Arc<Mutex<AppointmentStore>>) -> Self {
        Self { store }
    }

    /// Execute one function call and produce the result string to feed back
    /// into the dialogue.
    pub fn dispatch(&self, call: &FunctionCall) -> String {
        match Intent::from_tag(&call.name) {
            Some(Intent::Book) => self.book(call),
            Some(Intent::Edit) => self.edit(call),
            None => {
                tracing::warn!(name = %call.name, "unknown function tag from backend");
                "Function not recognized.".to_string()
            }
        }
    }

    fn book(&self, call: &FunctionCall) -> String {
        let fields: AppointmentFields = match serde_json::from_value(call.args.clone()) {
            Ok(fields) => fields,
            Err(e) => {
                // The backend is trusted to have gathered and confirmed all
                // six fields; a malformed call gets a corrective message
                // rather than a partial record.
                tracing::warn!(error = %e, "bookAppointment call missing required fields");
                return "Missing appointment details. Please gather the patient's name, email, \
                        date, time, doctor and clinic, then try again."
                    .to_string();
            }
        };
        self.store.lock().create(fields);
        "Appointment booked successfully. A confirmation email has been sent.".to_string()
    }

    fn edit(&self, call: &FunctionCall) -> String {
        let args: EditArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(error = %e, "editAppointment call missing patientName");
                return "No appointment found for that patient. Please ask the user to confirm \
                        the name and try again."
                    .to_string();
            }
        };

        let mut store = self.store.lock();
        let matches = store.find_matches(&args.criteria());
        match matches.as_slice() {
            [] => "No appointment found for that patient. Please ask the user to confirm the \
                   name and try again."
                .to_string(),
            [target] => {
                // The id was just read under this same lock, so the update
                // cannot miss.
                match store.update(target.id, &args.delta()) {
                    Ok(_) => format!(
                        "Appointment for {} updated successfully. Please confirm the new \
                         details with the user.",
                        args.patient_name
                    ),
                    Err(e) => {
                        tracing::error!(error = %e, "update failed for freshly matched id");
                        "No appointment found for that patient. Please ask the user to confirm \
                         the name and try again."
                            .to_string()
                    }
                }
            }
            _ => "Multiple appointments found. Please ask the user for more details to identify \
                  the correct one, such as the doctor's name or the appointment date."
                .to_string(),
        }
    }
}
