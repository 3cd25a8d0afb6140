//! End-to-end booking flow: function calls through the dispatcher mutate
//! the store, the store emits change events, and the webhook forwarder
//! delivers them.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use medibook::core::appointments::{AppointmentStore, ChangeKind};
use medibook::core::intents::{FunctionCall, IntentDispatcher};
use medibook::core::webhook::WebhookSink;

fn call(name: &str, args: serde_json::Value) -> FunctionCall {
    serde_json::from_value(json!({ "name": name, "args": args })).unwrap()
}

fn book_jane() -> FunctionCall {
    call(
        "bookAppointment",
        json!({
            "name": "Jane Doe",
            "email": "jane@example.com",
            "date": "2024-09-01",
            "time": "3 PM",
            "doctor": "Dr. Smith",
            "clinic": "Downtown Clinic"
        }),
    )
}

#[test]
fn book_then_edit_changes_only_the_requested_field() {
    let (store, mut events_rx) = AppointmentStore::new();
    let store = Arc::new(Mutex::new(store));
    let dispatcher = IntentDispatcher::new(store.clone());

    let result = dispatcher.dispatch(&book_jane());
    assert_eq!(
        result,
        "Appointment booked successfully. A confirmation email has been sent."
    );
    let booked = store.lock().all()[0].clone();

    let result = dispatcher.dispatch(&call(
        "editAppointment",
        json!({ "patientName": "Jane Doe", "newTime": "4 PM" }),
    ));
    assert_eq!(
        result,
        "Appointment for Jane Doe updated successfully. Please confirm the new details with the user."
    );

    let all = store.lock().all();
    assert_eq!(all.len(), 1);
    let updated = &all[0];
    assert_eq!(updated.time, "4 PM");
    assert_eq!(updated.id, booked.id);
    assert_eq!(updated.name, booked.name);
    assert_eq!(updated.email, booked.email);
    assert_eq!(updated.date, booked.date);
    assert_eq!(updated.doctor, booked.doctor);
    assert_eq!(updated.clinic, booked.clinic);

    // One event per committed mutation, the update carrying the
    // post-update snapshot.
    let created = events_rx.try_recv().unwrap();
    assert_eq!(created.event, ChangeKind::Created);
    let update_event = events_rx.try_recv().unwrap();
    assert_eq!(update_event.event, ChangeKind::Updated);
    assert_eq!(update_event.payload.time, "4 PM");
    assert_eq!(update_event.payload.id, booked.id);
    assert!(events_rx.try_recv().is_err());
}

#[test]
fn edit_without_a_match_leaves_the_store_untouched() {
    let (store, mut events_rx) = AppointmentStore::new();
    let store = Arc::new(Mutex::new(store));
    let dispatcher = IntentDispatcher::new(store.clone());

    dispatcher.dispatch(&book_jane());
    let result = dispatcher.dispatch(&call(
        "editAppointment",
        json!({ "patientName": "John Roe", "newTime": "4 PM" }),
    ));
    assert!(result.starts_with("No appointment found for that patient."));
    assert_eq!(store.lock().all()[0].time, "3 PM");

    // Only the booking emitted an event.
    assert_eq!(events_rx.try_recv().unwrap().event, ChangeKind::Created);
    assert!(events_rx.try_recv().is_err());
}

#[test]
fn ambiguous_edit_asks_for_narrowing() {
    let (store, _events_rx) = AppointmentStore::new();
    let store = Arc::new(Mutex::new(store));
    let dispatcher = IntentDispatcher::new(store.clone());

    dispatcher.dispatch(&book_jane());
    dispatcher.dispatch(&call(
        "bookAppointment",
        json!({
            "name": "Jane Doe",
            "email": "jane@example.com",
            "date": "2024-09-02",
            "time": "10 AM",
            "doctor": "Dr. Jones",
            "clinic": "Downtown Clinic"
        }),
    ));

    let result = dispatcher.dispatch(&call(
        "editAppointment",
        json!({ "patientName": "Jane Doe", "newTime": "5 PM" }),
    ));
    assert!(result.starts_with("Multiple appointments found"));

    // Narrowing by doctor resolves the ambiguity.
    let result = dispatcher.dispatch(&call(
        "editAppointment",
        json!({ "patientName": "Jane Doe", "doctorName": "Dr. Jones", "newTime": "5 PM" }),
    ));
    assert!(result.contains("updated successfully"));
    let all = store.lock().all();
    assert_eq!(all[0].time, "3 PM");
    assert_eq!(all[1].time, "5 PM");
}

#[tokio::test]
async fn committed_changes_reach_the_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/appointments"))
        .and(body_partial_json(json!({
            "event": "appointment_created",
            "payload": { "name": "Jane Doe", "doctor": "Dr. Smith" }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/appointments"))
        .and(body_partial_json(json!({
            "event": "appointment_updated",
            "payload": { "time": "4 PM" }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (store, events_rx) = AppointmentStore::new();
    let store = Arc::new(Mutex::new(store));
    let dispatcher = IntentDispatcher::new(store.clone());

    let sink = WebhookSink::new(Some(format!("{}/hooks/appointments", server.uri())));
    let forwarder = sink.spawn_forwarder(events_rx);

    dispatcher.dispatch(&book_jane());
    dispatcher.dispatch(&call(
        "editAppointment",
        json!({ "patientName": "Jane Doe", "newTime": "4 PM" }),
    ));

    // Dropping the store closes the event channel; the forwarder drains
    // what is queued and exits.
    drop(dispatcher);
    drop(store);
    forwarder.await.unwrap();
    server.verify().await;
}
