//! Integration tests for the projection engine over in-memory doubles.

use std::sync::Arc;

use eventline_core::error::EventSourcingError;
use eventline_core::event::{AGGREGATE_ID, Event};
use eventline_core::mapper::EventNameMapper;
use eventline_core::projection::{
    ProjectionManager, ProjectionOptions, ProjectionRecord, ProjectionStatus, Projector,
    StoredProjectionManager,
};
use eventline_core::store::{MappedEventStore, StreamName};
use eventline_test_support::{
    FixedClock, InMemoryEventStore, InMemoryProjectionStorage, RecordingReadModel,
};
use serde_json::{Value, json};

struct Fixture {
    events: MappedEventStore,
    storage: Arc<InMemoryProjectionStorage>,
    manager: StoredProjectionManager,
}

fn fixture() -> Fixture {
    let mapper =
        Arc::new(EventNameMapper::create_empty().with_alias("TicketRegistered", "ticketWasRegistered"));
    let store = Arc::new(InMemoryEventStore::new(mapper.clone()));
    let storage = Arc::new(InMemoryProjectionStorage::default());
    Fixture {
        events: MappedEventStore::new(
            store.clone(),
            mapper,
            Arc::new(FixedClock::default_instant()),
        ),
        storage: storage.clone(),
        manager: StoredProjectionManager::new(store, storage),
    }
}

fn event(event_type: &str, ticket_id: i64) -> Event {
    Event::from_json(
        event_type,
        json!({"ticketId": ticket_id}),
        json!({AGGREGATE_ID: ticket_id}),
    )
    .unwrap()
}

fn count_tickets(state: Value, _message: &eventline_core::event::StoredMessage) -> Value {
    let count = state["count"].as_i64().unwrap_or(0);
    json!({"count": count + 1})
}

async fn append(fixture: &Fixture, stream: &str, events: &[Event]) {
    fixture
        .events
        .append_to(&StreamName::new(stream), events)
        .await
        .unwrap();
}

async fn tickets_projector(fixture: &Fixture) -> Projector {
    fixture
        .manager
        .create_projection("tickets_list", ProjectionOptions::default())
        .await
        .unwrap()
        .init(|| json!({"count": 0}))
        .from_stream("tickets")
        .when("TicketRegistered", count_tickets)
}

// --- query ---

#[tokio::test]
async fn test_query_folds_by_resolved_type() {
    let fixture = fixture();
    append(
        &fixture,
        "tickets",
        &[event("TicketRegistered", 1), event("TicketClosed", 1), event("TicketRegistered", 2)],
    )
    .await;

    let mut query = fixture
        .manager
        .create_query()
        .await
        .unwrap()
        .init(|| json!({"count": 0}))
        .from_stream("tickets")
        .when("TicketRegistered", count_tickets);
    query.run().await.unwrap();

    assert_eq!(query.state(), &json!({"count": 2}));
}

#[tokio::test]
async fn test_query_resumes_and_resets() {
    let fixture = fixture();
    append(&fixture, "tickets", &[event("TicketRegistered", 1)]).await;
    let mut query = fixture
        .manager
        .create_query()
        .await
        .unwrap()
        .init(|| json!({"count": 0}))
        .from_stream("tickets")
        .when_any(count_tickets);
    query.run().await.unwrap();

    append(&fixture, "tickets", &[event("TicketRegistered", 2)]).await;
    query.run().await.unwrap();
    assert_eq!(query.state(), &json!({"count": 2}));

    query.reset();
    assert_eq!(query.state(), &json!({"count": 0}));
    query.run().await.unwrap();
    assert_eq!(query.state(), &json!({"count": 2}));
}

#[tokio::test]
async fn test_query_over_missing_stream_yields_initial_state() {
    let fixture = fixture();
    let mut query = fixture
        .manager
        .create_query()
        .await
        .unwrap()
        .init(|| json!({"count": 0}))
        .from_stream("nothing-here")
        .when_any(count_tickets);

    query.run().await.unwrap();

    assert_eq!(query.state(), &json!({"count": 0}));
}

// --- projector ---

#[tokio::test]
async fn test_projector_persists_state_and_positions() {
    let fixture = fixture();
    append(&fixture, "tickets", &[event("TicketRegistered", 1), event("TicketRegistered", 2)]).await;

    let mut projector = fixture
        .manager
        .create_projection("tickets_list", ProjectionOptions::default())
        .await
        .unwrap()
        .init(|| json!({"count": 0}))
        .from_stream("tickets")
        .when("TicketRegistered", count_tickets);
    projector.run(false).await.unwrap();

    let manager = &fixture.manager;
    assert_eq!(
        manager.fetch_projection_state("tickets_list").await.unwrap(),
        json!({"count": 2})
    );
    let positions = manager
        .fetch_projection_stream_positions("tickets_list")
        .await
        .unwrap();
    assert_eq!(positions.get("tickets"), Some(&2));
    assert_eq!(
        manager.fetch_projection_status("tickets_list").await.unwrap(),
        ProjectionStatus::Idle
    );
}

#[tokio::test]
async fn test_projector_continues_from_persisted_position() {
    let fixture = fixture();
    append(&fixture, "tickets", &[event("TicketRegistered", 1)]).await;
    tickets_projector(&fixture).await.run(false).await.unwrap();

    append(&fixture, "tickets", &[event("TicketRegistered", 2)]).await;
    let mut second = tickets_projector(&fixture).await;
    second.run(false).await.unwrap();

    assert_eq!(second.state(), &json!({"count": 2}));
}

#[tokio::test]
async fn test_unhandled_messages_still_advance_positions() {
    let fixture = fixture();
    append(&fixture, "tickets", &[event("TicketClosed", 1), event("TicketClosed", 2)]).await;

    fixture
        .manager
        .create_projection("closed_only", ProjectionOptions::default())
        .await
        .unwrap()
        .from_stream("tickets")
        .when("TicketRegistered", count_tickets)
        .run(false)
        .await
        .unwrap();

    let positions = fixture
        .manager
        .fetch_projection_stream_positions("closed_only")
        .await
        .unwrap();
    assert_eq!(positions.get("tickets"), Some(&2));
}

#[tokio::test]
async fn test_reset_flag_replays_from_start() {
    let fixture = fixture();
    append(&fixture, "tickets", &[event("TicketRegistered", 1)]).await;
    let mut projector = fixture
        .manager
        .create_projection("tickets_list", ProjectionOptions::default())
        .await
        .unwrap()
        .init(|| json!({"count": 0}))
        .from_stream("tickets")
        .when("TicketRegistered", count_tickets);
    projector.run(false).await.unwrap();

    fixture.manager.reset_projection("tickets_list").await.unwrap();
    assert_eq!(
        fixture.storage.row("tickets_list").unwrap().status,
        ProjectionStatus::Resetting
    );
    projector.run(false).await.unwrap();

    assert_eq!(
        fixture.manager.fetch_projection_state("tickets_list").await.unwrap(),
        json!({"count": 1})
    );
}

#[tokio::test]
async fn test_stop_flag_ends_continuous_run() {
    let fixture = fixture();
    append(&fixture, "tickets", &[event("TicketRegistered", 1)]).await;
    fixture.storage.insert(
        "tickets_list",
        ProjectionRecord {
            status: ProjectionStatus::Stopping,
            ..ProjectionRecord::idle()
        },
    );

    let mut projector = fixture
        .manager
        .create_projection("tickets_list", ProjectionOptions::default())
        .await
        .unwrap()
        .from_stream("tickets")
        .when_any(count_tickets);
    projector.run(true).await.unwrap();

    let row = fixture.storage.row("tickets_list").unwrap();
    assert_eq!(row.status, ProjectionStatus::Idle);
    assert!(row.positions.is_empty());
}

#[tokio::test]
async fn test_delete_flag_with_emitted_events_drops_projection_stream() {
    let fixture = fixture();
    append(&fixture, "tickets", &[event("TicketRegistered", 1)]).await;
    append(&fixture, "tickets_list", &[event("TicketListed", 1)]).await;
    let mut projector = fixture
        .manager
        .create_projection("tickets_list", ProjectionOptions::default())
        .await
        .unwrap()
        .from_stream("tickets")
        .when_any(count_tickets);
    projector.run(false).await.unwrap();

    fixture
        .manager
        .delete_projection("tickets_list", true)
        .await
        .unwrap();
    projector.run(false).await.unwrap();

    assert!(fixture.storage.row("tickets_list").is_none());
    assert!(
        !fixture
            .events
            .has_stream(&StreamName::new("tickets_list"))
            .await
            .unwrap()
    );
}

// --- read model projector ---

#[tokio::test]
async fn test_read_model_projector_initialises_and_persists_read_model() {
    let fixture = fixture();
    append(&fixture, "tickets", &[event("TicketRegistered", 1), event("TicketRegistered", 2)]).await;
    let read_model = RecordingReadModel::default();

    let mut projector = fixture
        .manager
        .create_read_model_projection(
            "ticket_read_model",
            Box::new(read_model.clone()),
            ProjectionOptions {
                persist_block_size: 1,
                ..ProjectionOptions::default()
            },
        )
        .await
        .unwrap()
        .from_stream("tickets")
        .when("TicketRegistered", |read_model, state, message| {
            read_model.stack("insert", Value::Object(message.payload().clone()));
            state
        });
    projector.run(false).await.unwrap();

    let log = read_model.log();
    assert_eq!(log.init_calls, 1);
    assert!(log.stacked.is_empty());
    assert_eq!(
        log.persisted,
        vec![
            ("insert".to_owned(), json!({"ticketId": 1})),
            ("insert".to_owned(), json!({"ticketId": 2})),
        ]
    );
}

#[tokio::test]
async fn test_read_model_is_deleted_with_emitted_events() {
    let fixture = fixture();
    let read_model = RecordingReadModel::default();
    let mut projector = fixture
        .manager
        .create_read_model_projection(
            "ticket_read_model",
            Box::new(read_model.clone()),
            ProjectionOptions::default(),
        )
        .await
        .unwrap()
        .from_stream("tickets");
    projector.run(false).await.unwrap();

    fixture
        .manager
        .delete_projection("ticket_read_model", true)
        .await
        .unwrap();
    projector.run(false).await.unwrap();

    assert!(read_model.log().deleted);
    assert!(fixture.storage.row("ticket_read_model").is_none());
}

// --- manager ---

#[tokio::test]
async fn test_flags_on_unknown_projection_fail() {
    let fixture = fixture();

    for result in [
        fixture.manager.stop_projection("ghost").await,
        fixture.manager.reset_projection("ghost").await,
        fixture.manager.delete_projection("ghost", false).await,
    ] {
        assert!(matches!(result, Err(EventSourcingError::ProjectionNotFound(name)) if name == "ghost"));
    }
    assert!(matches!(
        fixture.manager.fetch_projection_status("ghost").await,
        Err(EventSourcingError::ProjectionNotFound(_))
    ));
}

#[tokio::test]
async fn test_fetch_projection_names_filters_and_pages() {
    let fixture = fixture();
    for name in ["alpha", "beta", "gamma", "ticket_list"] {
        fixture.storage.insert(name, ProjectionRecord::idle());
    }

    let manager = &fixture.manager;
    assert_eq!(
        manager.fetch_projection_names(None, 2, 1).await.unwrap(),
        vec!["beta".to_owned(), "gamma".to_owned()]
    );
    assert_eq!(
        manager.fetch_projection_names(Some("gamma"), 20, 0).await.unwrap(),
        vec!["gamma".to_owned()]
    );
    assert_eq!(
        manager
            .fetch_projection_names_regex("^(alpha|ticket_.*)$", 20, 0)
            .await
            .unwrap(),
        vec!["alpha".to_owned(), "ticket_list".to_owned()]
    );
}

#[tokio::test]
async fn test_fetch_projection_names_rejects_bad_arguments() {
    let fixture = fixture();

    assert!(matches!(
        fixture.manager.fetch_projection_names(None, 0, 0).await,
        Err(EventSourcingError::InvalidArgument(_))
    ));
    assert!(matches!(
        fixture.manager.fetch_projection_names_regex("", 20, 0).await,
        Err(EventSourcingError::InvalidArgument(_))
    ));
}
