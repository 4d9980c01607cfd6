use sea_orm::{ConnectionTrait, Database, DatabaseConnection};

use engine::{
    AuditAction, Authority, EgressPolicy, Engine, EngineError, Money, MovementCmd, MovementKind,
    MovementListFilter, MovementOrigin, OpenRegisterCmd, Register,
};
use migration::MigratorTrait;
use uuid::Uuid;

async fn engine_with_db() -> (Engine, DatabaseConnection) {
    engine_with_policy(EgressPolicy::RejectOverdraft).await
}

async fn engine_with_policy(policy: EgressPolicy) -> (Engine, DatabaseConnection) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder()
        .database(db.clone())
        .egress_policy(policy)
        .build()
        .await
        .unwrap();
    (engine, db)
}

fn money(raw: &str) -> Money {
    raw.parse().unwrap()
}

async fn cash_id(engine: &Engine) -> Uuid {
    engine
        .payment_method_by_name(&Authority::owner("boss"), "cash")
        .await
        .unwrap()
        .id
}

async fn open(engine: &Engine, initial: &str) -> Register {
    engine
        .open_register(
            &Authority::owner("boss"),
            OpenRegisterCmd::new(money(initial)).operator("ana"),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn resulting_balance_matches_a_replay_of_the_prefix() {
    let (engine, _db) = engine_with_db().await;
    let boss = Authority::owner("boss");
    let cash = cash_id(&engine).await;
    let card = engine.new_payment_method(&boss, "Card").await.unwrap();
    let register = open(&engine, "80.00").await;

    let plan = [
        (MovementKind::Inflow, "12.50", cash),
        (MovementKind::Outflow, "30.00", cash),
        (MovementKind::Inflow, "99.99", card.id),
        (MovementKind::Outflow, "0.49", card.id),
        (MovementKind::Inflow, "1.00", cash),
    ];
    for (kind, amount, method) in plan {
        engine
            .append_movement(&boss, MovementCmd::new(register.id, kind, money(amount), method))
            .await
            .unwrap();
    }

    let history = engine.register_history(&boss, register.id).await.unwrap();
    assert_eq!(history.len(), plan.len());
    let mut running = register.initial_balance;
    for (index, movement) in history.iter().enumerate() {
        assert_eq!(movement.sequence, index as i64 + 1);
        running += movement.signed_amount();
        assert_eq!(movement.resulting_balance, running);
        assert_eq!(movement.created_by, "boss");
    }

    assert_eq!(
        engine.current_balance(&boss, register.id).await.unwrap(),
        money("163.00")
    );
    assert_eq!(
        engine.register(&boss, register.id).await.unwrap().balance,
        money("163.00")
    );
}

#[tokio::test]
async fn overdraft_is_rejected_by_default() {
    let (engine, _db) = engine_with_db().await;
    let boss = Authority::owner("boss");
    let cash = cash_id(&engine).await;
    let register = open(&engine, "300.00").await;

    let err = engine
        .append_movement(&boss, MovementCmd::outflow(register.id, money("1000.00"), cash))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientBalance(_)));
    assert!(
        engine
            .register_history(&boss, register.id)
            .await
            .unwrap()
            .is_empty()
    );

    // Draining the till exactly is allowed.
    let movement = engine
        .append_movement(&boss, MovementCmd::outflow(register.id, money("300.00"), cash))
        .await
        .unwrap();
    assert_eq!(movement.resulting_balance, Money::ZERO);
}

#[tokio::test]
async fn allow_negative_policy_records_the_overdraft() {
    let (engine, _db) = engine_with_policy(EgressPolicy::AllowNegative).await;
    let boss = Authority::owner("boss");
    let cash = cash_id(&engine).await;
    let register = open(&engine, "300.00").await;

    let movement = engine
        .append_movement(&boss, MovementCmd::outflow(register.id, money("1000.00"), cash))
        .await
        .unwrap();
    assert_eq!(movement.resulting_balance, money("-700.00"));

    let report = engine
        .close_register(&boss, register.id, Money::ZERO)
        .await
        .unwrap();
    assert_eq!(report.system_balance, money("-700.00"));
    assert_eq!(report.discrepancy, money("700.00"));
}

#[tokio::test]
async fn closed_register_accepts_no_movements() {
    let (engine, _db) = engine_with_db().await;
    let boss = Authority::owner("boss");
    let cash = cash_id(&engine).await;
    let register = open(&engine, "50.00").await;
    engine
        .close_register(&boss, register.id, money("50.00"))
        .await
        .unwrap();

    let err = engine
        .append_movement(&boss, MovementCmd::inflow(register.id, money("5.00"), cash))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Conflict(format!("register {} is closed", register.id))
    );
    assert!(
        engine
            .register_history(&boss, register.id)
            .await
            .unwrap()
            .is_empty()
    );

    let entries = engine
        .list_audit_entries(&boss, Some(register.id), 10)
        .await
        .unwrap();
    let failure = entries
        .iter()
        .find(|e| e.action == AuditAction::Failure)
        .unwrap();
    assert_eq!(failure.actor, "boss");
    assert!(failure.detail.starts_with("append movement failed (conflict)"));
}

#[tokio::test]
async fn invalid_movements_are_rejected() {
    let (engine, _db) = engine_with_db().await;
    let boss = Authority::owner("boss");
    let cash = cash_id(&engine).await;
    let register = open(&engine, "50.00").await;

    for amount in [Money::ZERO, money("-5.00")] {
        let err = engine
            .append_movement(&boss, MovementCmd::inflow(register.id, amount, cash))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Validation("amount must be greater than zero".to_string())
        );
    }

    let unknown = Uuid::new_v4();
    let err = engine
        .append_movement(&boss, MovementCmd::inflow(register.id, money("5.00"), unknown))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Validation(format!("unknown payment method {unknown}"))
    );

    let missing = Uuid::new_v4();
    let err = engine
        .append_movement(&boss, MovementCmd::inflow(missing, money("5.00"), cash))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::NotFound(format!("register {missing}")));

    assert!(
        engine
            .register_history(&boss, register.id)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        engine.register(&boss, register.id).await.unwrap().balance,
        money("50.00")
    );
}

#[tokio::test]
async fn viewers_and_other_cashiers_cannot_append() {
    let (engine, _db) = engine_with_db().await;
    let cash = cash_id(&engine).await;
    let register = open(&engine, "50.00").await;

    let err = engine
        .append_movement(
            &Authority::viewer("auditor"),
            MovementCmd::inflow(register.id, money("5.00"), cash),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let err = engine
        .append_movement(
            &Authority::cashier("luis"),
            MovementCmd::inflow(register.id, money("5.00"), cash),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let movement = engine
        .append_movement(
            &Authority::cashier("ana"),
            MovementCmd::inflow(register.id, money("5.00"), cash),
        )
        .await
        .unwrap();
    assert_eq!(movement.created_by, "ana");

    // Integrations act on any till.
    let movement = engine
        .append_movement(
            &Authority::system("orders"),
            MovementCmd::inflow(register.id, money("5.00"), cash),
        )
        .await
        .unwrap();
    assert_eq!(movement.resulting_balance, money("60.00"));
}

#[tokio::test]
async fn idempotency_key_replays_the_first_movement() {
    let (engine, _db) = engine_with_db().await;
    let boss = Authority::owner("boss");
    let cash = cash_id(&engine).await;
    let register = open(&engine, "500.00").await;

    let first = engine
        .record_purchase_payment(&boss, register.id, money("120.00"), cash, "P-17", Some("p-17"))
        .await
        .unwrap();
    let again = engine
        .record_purchase_payment(&boss, register.id, money("120.00"), cash, "P-17", Some("p-17"))
        .await
        .unwrap();
    assert_eq!(first, again);
    assert_eq!(first.origin, MovementOrigin::Purchase);
    assert_eq!(first.origin_ref.as_deref(), Some("P-17"));
    assert_eq!(first.description, "Purchase P-17");

    let err = engine
        .record_purchase_payment(&boss, register.id, money("99.00"), cash, "P-17", Some("p-17"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let history = engine.register_history(&boss, register.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        engine.register(&boss, register.id).await.unwrap().balance,
        money("380.00")
    );

    let sale = engine
        .record_sale_collection(&boss, register.id, money("45.00"), cash, "O-3", None)
        .await
        .unwrap();
    assert_eq!(sale.kind, MovementKind::Inflow);
    assert_eq!(sale.origin, MovementOrigin::Sale);
    assert_eq!(sale.resulting_balance, money("425.00"));
}

#[tokio::test]
async fn idempotency_key_does_not_cross_cashiers() {
    let (engine, _db) = engine_with_db().await;
    let cash = cash_id(&engine).await;
    let ana = Authority::cashier("ana");
    let luis = Authority::cashier("luis");
    let register = engine
        .open_register(&ana, OpenRegisterCmd::new(money("100.00")))
        .await
        .unwrap();

    let cmd = MovementCmd::inflow(register.id, money("5.00"), cash).idempotency_key("sale-7");
    engine.append_movement(&ana, cmd.clone()).await.unwrap();

    let err = engine.append_movement(&luis, cmd).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
}

#[tokio::test]
async fn idempotency_key_cannot_reach_a_closed_register() {
    let (engine, _db) = engine_with_db().await;
    let boss = Authority::owner("boss");
    let cash = cash_id(&engine).await;
    let register = open(&engine, "100.00").await;

    let cmd = MovementCmd::inflow(register.id, money("5.00"), cash).idempotency_key("sale-7");
    engine.append_movement(&boss, cmd.clone()).await.unwrap();
    engine
        .close_register(&boss, register.id, money("105.00"))
        .await
        .unwrap();

    let err = engine.append_movement(&boss, cmd).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Conflict(format!("register {} is closed", register.id))
    );
}

#[tokio::test]
async fn idempotency_key_reused_for_another_purchase_conflicts() {
    let (engine, _db) = engine_with_db().await;
    let boss = Authority::owner("boss");
    let cash = cash_id(&engine).await;
    let register = open(&engine, "500.00").await;

    engine
        .record_purchase_payment(&boss, register.id, money("120.00"), cash, "P-17", Some("k"))
        .await
        .unwrap();
    let err = engine
        .record_purchase_payment(&boss, register.id, money("120.00"), cash, "P-18", Some("k"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let err = engine
        .append_movement(
            &boss,
            MovementCmd::outflow(register.id, money("120.00"), cash)
                .description("Purchase P-17")
                .idempotency_key("k"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let history = engine.register_history(&boss, register.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].origin_ref.as_deref(), Some("P-17"));
}

#[tokio::test]
async fn list_movements_paginates_newest_first() {
    let (engine, _db) = engine_with_db().await;
    let boss = Authority::owner("boss");
    let cash = cash_id(&engine).await;
    let register = open(&engine, "0.00").await;

    for i in 1..=5 {
        engine
            .append_movement(
                &boss,
                MovementCmd::inflow(register.id, Money::new(i * 100), cash)
                    .description(format!("ticket {i}")),
            )
            .await
            .unwrap();
    }

    let filter = MovementListFilter::default();
    let (page, cursor) = engine
        .list_movements(&boss, register.id, &filter, 2, None)
        .await
        .unwrap();
    assert_eq!(
        page.iter().map(|m| m.sequence).collect::<Vec<_>>(),
        vec![5, 4]
    );
    let cursor = cursor.unwrap();

    let (page, cursor) = engine
        .list_movements(&boss, register.id, &filter, 2, Some(&cursor))
        .await
        .unwrap();
    assert_eq!(
        page.iter().map(|m| m.sequence).collect::<Vec<_>>(),
        vec![3, 2]
    );

    let (page, cursor) = engine
        .list_movements(&boss, register.id, &filter, 2, cursor.as_deref())
        .await
        .unwrap();
    assert_eq!(page.iter().map(|m| m.sequence).collect::<Vec<_>>(), vec![1]);
    assert!(cursor.is_none());

    let err = engine
        .list_movements(&boss, register.id, &filter, 2, Some("garbage"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCursor(_)));
}

#[tokio::test]
async fn list_movements_applies_filters() {
    let (engine, _db) = engine_with_db().await;
    let boss = Authority::owner("boss");
    let cash = cash_id(&engine).await;
    let card = engine.new_payment_method(&boss, "Card").await.unwrap();
    let register = open(&engine, "100.00").await;

    engine
        .record_sale_collection(&boss, register.id, money("10.00"), card.id, "O-1", None)
        .await
        .unwrap();
    engine
        .record_purchase_payment(&boss, register.id, money("20.00"), cash, "P-1", None)
        .await
        .unwrap();
    engine
        .append_movement(
            &boss,
            MovementCmd::outflow(register.id, money("5.00"), cash).description("Paper rolls"),
        )
        .await
        .unwrap();

    let filter = MovementListFilter {
        kind: Some(MovementKind::Outflow),
        ..Default::default()
    };
    let (page, _) = engine
        .list_movements(&boss, register.id, &filter, 10, None)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);

    let filter = MovementListFilter {
        origin: Some(MovementOrigin::Purchase),
        ..Default::default()
    };
    let (page, _) = engine
        .list_movements(&boss, register.id, &filter, 10, None)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].origin_ref.as_deref(), Some("P-1"));

    let filter = MovementListFilter {
        payment_method_id: Some(card.id),
        ..Default::default()
    };
    let (page, _) = engine
        .list_movements(&boss, register.id, &filter, 10, None)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].kind, MovementKind::Inflow);

    let filter = MovementListFilter {
        search: Some("paper".to_string()),
        ..Default::default()
    };
    let (page, _) = engine
        .list_movements(&boss, register.id, &filter, 10, None)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].description, "Paper rolls");
}

#[tokio::test]
async fn summary_groups_by_kind_and_method() {
    let (engine, _db) = engine_with_db().await;
    let boss = Authority::owner("boss");
    let cash = cash_id(&engine).await;
    let card = engine.new_payment_method(&boss, "Card").await.unwrap();
    let register = open(&engine, "100.00").await;

    for (kind, amount, method) in [
        (MovementKind::Inflow, "10.00", cash),
        (MovementKind::Inflow, "15.00", cash),
        (MovementKind::Inflow, "40.00", card.id),
        (MovementKind::Outflow, "25.00", cash),
    ] {
        engine
            .append_movement(&boss, MovementCmd::new(register.id, kind, money(amount), method))
            .await
            .unwrap();
    }

    let summary = engine.movement_summary(&boss, register.id).await.unwrap();
    assert_eq!(summary.initial_balance, money("100.00"));
    assert_eq!(summary.total_inflow, money("65.00"));
    assert_eq!(summary.total_outflow, money("25.00"));
    assert_eq!(summary.balance, money("140.00"));
    assert_eq!(summary.movements, 4);

    let lines: Vec<(MovementKind, &str, u64, Money)> = summary
        .lines
        .iter()
        .map(|l| (l.kind, l.payment_method.as_str(), l.movements, l.total))
        .collect();
    assert_eq!(
        lines,
        vec![
            (MovementKind::Inflow, "Card", 1, money("40.00")),
            (MovementKind::Inflow, "Cash", 2, money("25.00")),
            (MovementKind::Outflow, "Cash", 1, money("25.00")),
        ]
    );
}

#[tokio::test]
async fn drifted_balance_is_detected_and_repaired() {
    let (engine, db) = engine_with_db().await;
    let boss = Authority::owner("boss");
    let cash = cash_id(&engine).await;
    let register = open(&engine, "100.00").await;
    engine
        .append_movement(&boss, MovementCmd::inflow(register.id, money("20.00"), cash))
        .await
        .unwrap();

    let check = engine
        .verify_register_balance(&boss, register.id)
        .await
        .unwrap();
    assert!(check.is_consistent());

    db.execute_unprepared(&format!(
        "UPDATE registers SET balance_minor = 1 WHERE id = '{}'",
        register.id
    ))
    .await
    .unwrap();

    let check = engine
        .verify_register_balance(&boss, register.id)
        .await
        .unwrap();
    assert!(!check.is_consistent());
    assert_eq!(check.materialized, money("0.01"));
    assert_eq!(check.replayed, money("120.00"));
    assert_eq!(check.drift(), money("-119.99"));

    // The overdraft guard trusts the history, not the drifted column.
    let movement = engine
        .append_movement(&boss, MovementCmd::outflow(register.id, money("50.00"), cash))
        .await
        .unwrap();
    assert_eq!(movement.resulting_balance, money("70.00"));

    db.execute_unprepared(&format!(
        "UPDATE registers SET balance_minor = 1 WHERE id = '{}'",
        register.id
    ))
    .await
    .unwrap();
    let err = engine
        .recompute_register_balance(&Authority::cashier("ana"), register.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let repaired = engine
        .recompute_register_balance(&boss, register.id)
        .await
        .unwrap();
    assert_eq!(repaired.materialized, money("0.01"));
    assert!(
        engine
            .verify_register_balance(&boss, register.id)
            .await
            .unwrap()
            .is_consistent()
    );
}

#[tokio::test]
async fn audit_entries_link_movements() {
    let (engine, _db) = engine_with_db().await;
    let boss = Authority::owner("boss").source_address("10.0.0.7");
    let cash = cash_id(&engine).await;
    let register = open(&engine, "10.00").await;

    let movement = engine
        .append_movement(&boss, MovementCmd::inflow(register.id, money("2.50"), cash))
        .await
        .unwrap();

    let entries = engine
        .list_audit_entries(&boss, Some(register.id), 10)
        .await
        .unwrap();
    let entry = entries
        .iter()
        .find(|e| e.action == AuditAction::MovementAdd)
        .unwrap();
    assert_eq!(entry.movement_id, Some(movement.id));
    assert_eq!(entry.register_id, Some(register.id));
    assert_eq!(entry.source_address.as_deref(), Some("10.0.0.7"));
    assert_eq!(entry.detail, "inflow of 2.50 via Cash: balance 10.00 -> 12.50");

    let err = engine
        .list_audit_entries(&Authority::cashier("ana"), None, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
}
