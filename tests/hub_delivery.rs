use std::time::{Duration, Instant};
use tablehub::hub::event::HubEvent;
use tablehub::{
    CallerContext, ColumnSpec, ColumnType, EngineConfig, Hub, NewTable, Notifier, RowValues,
    TableEngine,
};

async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

#[tokio::test]
async fn broadcast_to_an_empty_topic_never_blocks() {
    let hub = Hub::start("tables", 4, 4);
    let started = Instant::now();
    let mut accepted = 0;
    for _ in 0..10_000 {
        if hub.try_broadcast("t_nobody", HubEvent::FetchTable) {
            accepted += 1;
        }
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(accepted >= 1);

    settle().await;
    let metrics = hub.metrics();
    assert_eq!(metrics.accepted, accepted);
    assert_eq!(metrics.accepted + metrics.dropped, 10_000);
    assert_eq!(metrics.subscribers, 0);
}

#[tokio::test]
async fn slow_subscriber_is_evicted_without_stalling_the_topic() {
    let hub = Hub::start("tables", 64, 1);
    let mut slow = hub.subscribe("t_busy").await.expect("slow");

    for _ in 0..3 {
        assert!(hub.try_broadcast("t_busy", HubEvent::FetchTable));
    }
    settle().await;
    assert_eq!(hub.metrics().evicted, 1);

    assert!(slow.recv().await.is_some());
    let closed = tokio::time::timeout(Duration::from_secs(1), slow.recv())
        .await
        .expect("closed promptly");
    assert!(closed.is_none());

    let mut fresh = hub.subscribe("t_busy").await.expect("fresh");
    assert!(hub.try_broadcast("t_busy", HubEvent::FetchTable));
    let message = tokio::time::timeout(Duration::from_secs(1), fresh.recv())
        .await
        .expect("timely")
        .expect("delivered");
    assert_eq!(message.event_action, "fetch_table");
}

#[tokio::test]
async fn engine_pushes_cell_values_to_table_subscribers() {
    let engine = TableEngine::in_memory(EngineConfig::development()).expect("engine");
    let alice = CallerContext::new(
        engine
            .register_user("alice@example.com", "Alice")
            .expect("user")
            .id,
    );
    let database = engine.create_database(&alice, "Live").expect("database");
    let table = engine
        .create_table(
            &alice,
            NewTable {
                name: "Board".into(),
                database_id: database.id,
                columns: vec![ColumnSpec::new("Score", ColumnType::Numeric)],
            },
        )
        .await
        .expect("table");
    let score = table.columns[0].id.clone();
    let row = engine
        .add_row(&alice, &table.id, RowValues::new(), None)
        .await
        .expect("row");
    settle().await;

    let hubs = engine.hubs().expect("hubs").clone();
    let mut watcher = hubs.tables.subscribe(&table.id).await.expect("subscribe");
    engine
        .set_cell_value(&alice, &table.id, row.id, &score, Some("42".into()))
        .await
        .expect("set");

    let message = tokio::time::timeout(Duration::from_secs(1), watcher.recv())
        .await
        .expect("timely")
        .expect("message");
    assert_eq!(message.topic, table.id);
    assert_eq!(message.event_action, "set_cell_value");
    assert_eq!(message.payload["row_id"], row.id);
    assert_eq!(message.payload["column_id"], score.as_str());
    assert_eq!(message.payload["value"], "42");
}

#[tokio::test]
async fn membership_changes_reach_the_user_topic() {
    let engine = TableEngine::in_memory(EngineConfig::development()).expect("engine");
    let owner = CallerContext::new(engine.register_user("o@example.com", "O").expect("user").id);
    let guest = engine.register_user("g@example.com", "G").expect("user");
    let database = engine.create_database(&owner, "Shared").expect("database");

    let hubs = engine.hubs().expect("hubs").clone();
    let mut inbox = hubs.users.subscribe(&guest.id.to_string()).await.expect("subscribe");
    engine
        .set_role(&owner, database.id, guest.id, tablehub::Role::Reader)
        .expect("grant");

    let message = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
        .await
        .expect("timely")
        .expect("message");
    assert_eq!(message.event_action, "fetch_databases");
    assert!(message.payload.is_null());
}
