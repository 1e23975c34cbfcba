//! Database tests

use super::*;
use crate::error::Error;
use crate::models::*;
use chrono::{Duration, TimeZone};

fn ts(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap()
}

fn setup_account(db: &Database, balance: f64) -> Account {
    db.create_account(&NewAccount {
        external_ref: format!("ext_{}", balance),
        name: "Operating".to_string(),
        current_balance: balance,
    })
    .unwrap()
}

#[test]
fn test_in_memory_db() {
    let db = Database::in_memory().unwrap();
    let accounts = db.list_accounts().unwrap();
    assert!(accounts.is_empty());
}

#[test]
fn test_account_crud() {
    let db = Database::in_memory().unwrap();

    let account = setup_account(&db, 150.0);
    assert!(account.id > 0);
    assert_eq!(account.current_balance, 150.0);
    assert!(account.last_sync.is_none());

    let fetched = db.get_account(account.id).unwrap().unwrap();
    assert_eq!(fetched.external_ref, "ext_150");
    assert_eq!(fetched.name, "Operating");

    assert!(db.get_account(9999).unwrap().is_none());
}

#[test]
fn test_duplicate_external_ref_rejected() {
    let db = Database::in_memory().unwrap();
    setup_account(&db, 10.0);

    let result = db.create_account(&NewAccount {
        external_ref: "ext_10".to_string(),
        name: "Duplicate".to_string(),
        current_balance: 0.0,
    });
    assert!(matches!(result, Err(Error::InvalidData(_))));
    assert_eq!(db.list_accounts().unwrap().len(), 1);
}

#[test]
fn test_outcomes_listed_newest_first() {
    let db = Database::in_memory().unwrap();
    let account = setup_account(&db, 100.0);

    for hour in [8, 10, 9] {
        let new = NewReconciliation::automatic(account.id, 100.0, 100.0 - hour as f64);
        db.record_attempt(&new, &AttemptResolution::Held { reason: "review".into() }, ts(hour))
            .unwrap();
    }

    let outcomes = db.list_reconciliations_for_account(account.id, 10).unwrap();
    let hours: Vec<_> = outcomes.iter().map(|o| o.created_at).collect();
    assert_eq!(hours, vec![ts(10), ts(9), ts(8)]);

    let limited = db.list_reconciliations_for_account(account.id, 2).unwrap();
    assert_eq!(limited.len(), 2);

    let before = db
        .list_reconciliations_before(account.id, ts(10), 10)
        .unwrap();
    assert_eq!(before.len(), 2);
    assert!(before.iter().all(|o| o.created_at < ts(10)));
}

#[test]
fn test_record_attempt_settled() {
    let db = Database::in_memory().unwrap();
    let account = setup_account(&db, 100.0);

    let new = NewReconciliation::automatic(account.id, 100.0, 100.005);
    let outcome = db
        .record_attempt(&new, &AttemptResolution::Settled, ts(12))
        .unwrap();

    assert_eq!(outcome.status, ReconciliationStatus::Completed);
    assert_eq!(outcome.reconciliation_type, ReconciliationType::Automatic);
    assert!(outcome.error_message.is_none());
    assert!(db
        .get_adjustment_for_reconciliation(outcome.id)
        .unwrap()
        .is_none());

    let unchanged = db.get_account(account.id).unwrap().unwrap();
    assert_eq!(unchanged.current_balance, 100.0);
    assert!(unchanged.last_sync.is_none());
}

#[test]
fn test_record_attempt_adjusted_updates_account() {
    let db = Database::in_memory().unwrap();
    let account = setup_account(&db, 100.0);

    let new = NewReconciliation::automatic(account.id, 100.0, 95.0);
    let outcome = db
        .record_attempt(
            &new,
            &AttemptResolution::Adjusted {
                amount: -5.0,
                description: "Automatic reconciliation adjustment".to_string(),
                external_balance: 95.0,
            },
            ts(12),
        )
        .unwrap();

    assert_eq!(outcome.status, ReconciliationStatus::Completed);
    assert_eq!(outcome.difference, 5.0);

    let adjustment = db
        .get_adjustment_for_reconciliation(outcome.id)
        .unwrap()
        .unwrap();
    assert_eq!(adjustment.amount, -5.0);

    let synced = db.get_account(account.id).unwrap().unwrap();
    assert_eq!(synced.current_balance, 95.0);
    assert_eq!(synced.last_sync, Some(ts(12)));

    assert_eq!(db.list_adjustments_for_account(account.id).unwrap().len(), 1);
}

#[test]
fn test_record_attempt_rolls_back_on_failure() {
    let db = Database::in_memory().unwrap();
    let account = setup_account(&db, 100.0);

    // Empty descriptions violate the adjustments CHECK constraint
    let new = NewReconciliation::automatic(account.id, 100.0, 95.0);
    let result = db.record_attempt(
        &new,
        &AttemptResolution::Adjusted {
            amount: -5.0,
            description: String::new(),
            external_balance: 95.0,
        },
        ts(12),
    );
    assert!(result.is_err());

    // No outcome, no adjustment, no balance change
    assert!(db
        .list_reconciliations_for_account(account.id, 10)
        .unwrap()
        .is_empty());
    let unchanged = db.get_account(account.id).unwrap().unwrap();
    assert_eq!(unchanged.current_balance, 100.0);
    assert!(unchanged.last_sync.is_none());
}

#[test]
fn test_record_attempt_unknown_account_fails() {
    let db = Database::in_memory().unwrap();
    let new = NewReconciliation::automatic(4242, 1.0, 2.0);
    assert!(db
        .record_attempt(&new, &AttemptResolution::Settled, ts(1))
        .is_err());
    assert!(db.list_recent_reconciliations(10).unwrap().is_empty());
}

#[test]
fn test_terminal_outcomes_are_immutable() {
    let db = Database::in_memory().unwrap();
    let account = setup_account(&db, 100.0);

    let new = NewReconciliation::automatic(account.id, 100.0, 90.0);
    let held = db
        .record_attempt(
            &new,
            &AttemptResolution::Held {
                reason: "manual review".to_string(),
            },
            ts(3),
        )
        .unwrap();
    assert_eq!(held.status, ReconciliationStatus::Pending);
    assert_eq!(held.error_message.as_deref(), Some("manual review"));

    // Pending can still be resolved by an operator
    db.update_reconciliation_status(held.id, ReconciliationStatus::Completed, None)
        .unwrap();

    let result =
        db.update_reconciliation_status(held.id, ReconciliationStatus::Failed, Some("late"));
    assert!(matches!(result, Err(Error::InvalidData(_))));
    assert_eq!(
        db.get_reconciliation(held.id).unwrap().unwrap().status,
        ReconciliationStatus::Completed
    );

    assert!(matches!(
        db.update_reconciliation_status(777, ReconciliationStatus::Completed, None),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_status_counts_and_listing() {
    let db = Database::in_memory().unwrap();
    let account = setup_account(&db, 100.0);
    let start = ts(0);

    for i in 0..5 {
        let new = NewReconciliation::automatic(account.id, 100.0, 100.0);
        db.record_attempt(&new, &AttemptResolution::Settled, start + Duration::hours(i))
            .unwrap();
    }
    let new = NewReconciliation::automatic(account.id, 100.0, 50.0);
    db.record_attempt(
        &new,
        &AttemptResolution::Failed {
            error: "provider rejected".to_string(),
        },
        start + Duration::hours(6),
    )
    .unwrap();

    assert_eq!(
        db.count_reconciliations_since(ReconciliationStatus::Completed, start)
            .unwrap(),
        5
    );
    assert_eq!(
        db.count_reconciliations_since(ReconciliationStatus::Completed, start + Duration::hours(3))
            .unwrap(),
        2
    );
    assert_eq!(
        db.list_reconciliations_by_status(ReconciliationStatus::Failed)
            .unwrap()
            .len(),
        1
    );

    let recent = db.list_recent_reconciliations(3).unwrap();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].status, ReconciliationStatus::Failed);
}
