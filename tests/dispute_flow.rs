mod common;

use anyhow::Result;
use diesel::prelude::*;

use collab_engine::models::{CollaborationRequest, Dispute, User};
use collab_engine::schema::notifications as notifications_table;
use collab_engine::{collaborations, disputes, error::EngineError};

use common::{acquire_db_lock, now, RecordingGateway, TestDb};

struct Scenario {
    db: TestDb,
    owner: User,
    partner: User,
    collaboration: CollaborationRequest,
}

fn scenario() -> Result<Option<Scenario>> {
    let Some(db) = TestDb::new()? else { return Ok(None) };
    let owner = db.insert_user("ava")?;
    let partner = db.insert_user("noor")?;
    let mut conn = db.conn()?;
    let collaboration = collaborations::create_collaboration(
        &mut conn,
        owner.id,
        "Logo refresh",
        "Refresh the brand mark",
        None,
    )?;
    drop(conn);
    Ok(Some(Scenario {
        db,
        owner,
        partner,
        collaboration,
    }))
}

fn open_manual_dispute(
    scenario: &Scenario,
    gateway: &RecordingGateway,
    links: &[String],
) -> Result<Dispute> {
    let mut conn = scenario.db.conn()?;
    Ok(disputes::open_dispute(
        &mut conn,
        gateway,
        disputes::OpenDisputeParams {
            collaboration_id: scenario.collaboration.id,
            initiator_id: scenario.owner.id,
            respondent_id: scenario.partner.id,
            kind: disputes::KIND_QUALITY,
            description: "deliverable does not match the brief",
            evidence_links: links,
        },
        now(),
    )?)
}

fn queued_kinds_for(db: &TestDb, user_id: uuid::Uuid) -> Result<Vec<String>> {
    let mut conn = db.conn()?;
    Ok(notifications_table::table
        .filter(notifications_table::user_id.eq(user_id))
        .select(notifications_table::kind)
        .load(&mut conn)?)
}

#[test]
fn opening_stores_initial_links_and_notifies_respondent() -> Result<()> {
    let _guard = acquire_db_lock();
    let Some(scenario) = scenario()? else { return Ok(()) };

    let gateway = RecordingGateway::default();
    let links = vec!["https://example.test/brief".to_string()];
    let dispute = open_manual_dispute(&scenario, &gateway, &links)?;

    assert_eq!(dispute.status, disputes::STATUS_OPEN);
    assert!(!disputes::is_auto_opened(&dispute));

    let log: Vec<disputes::EvidenceEntry> = serde_json::from_value(dispute.evidence)?;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].entry_type, "evidence");
    assert_eq!(log[0].content, "https://example.test/brief");
    assert_eq!(log[0].submitted_by, scenario.owner.id);

    let kinds = queued_kinds_for(&scenario.db, scenario.partner.id)?;
    assert!(kinds.iter().any(|kind| kind == "dispute_opened"));
    Ok(())
}

#[test]
fn one_open_dispute_per_collaboration_and_party() -> Result<()> {
    let _guard = acquire_db_lock();
    let Some(scenario) = scenario()? else { return Ok(()) };

    let gateway = RecordingGateway::default();
    let first = open_manual_dispute(&scenario, &gateway, &[])?;

    let duplicate = open_manual_dispute(&scenario, &gateway, &[]);
    assert!(matches!(duplicate, Err(err) if err.downcast_ref::<EngineError>()
        .map(EngineError::is_duplicate)
        .unwrap_or(false)));

    // Once the first dispute is resolved a new one may be opened.
    let admin = scenario.db.insert_user("admin")?;
    let mut conn = scenario.db.conn()?;
    disputes::resolve(
        &mut conn,
        &gateway,
        &first,
        disputes::RESOLUTION_NO_ACTION,
        "talked it through",
        None,
        admin.id,
        now(),
    )?;
    drop(conn);

    let second = open_manual_dispute(&scenario, &gateway, &[])?;
    assert_eq!(second.status, disputes::STATUS_OPEN);
    Ok(())
}

#[test]
fn responding_appends_to_the_evidence_log() -> Result<()> {
    let _guard = acquire_db_lock();
    let Some(scenario) = scenario()? else { return Ok(()) };

    let gateway = RecordingGateway::default();
    let dispute = open_manual_dispute(&scenario, &gateway, &[])?;
    let mut conn = scenario.db.conn()?;

    // Only the respondent may respond.
    let intruder = disputes::respond(
        &mut conn,
        &gateway,
        &dispute,
        scenario.owner.id,
        "not yours to answer",
        &[],
        now(),
    );
    assert!(matches!(intruder, Err(EngineError::Forbidden(_))));

    let links = vec![
        "https://example.test/v1".to_string(),
        "https://example.test/v2".to_string(),
    ];
    let updated = disputes::respond(
        &mut conn,
        &gateway,
        &dispute,
        scenario.partner.id,
        "first draft was delivered on time",
        &links,
        now(),
    )?;

    let log: Vec<disputes::EvidenceEntry> = serde_json::from_value(updated.evidence)?;
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].entry_type, "response");
    assert_eq!(log[0].content, "first draft was delivered on time");
    assert_eq!(log[1].entry_type, "evidence");
    assert!(log.iter().skip(1).all(|e| e.submitted_by == scenario.partner.id));

    let kinds = queued_kinds_for(&scenario.db, scenario.owner.id)?;
    assert!(kinds.iter().any(|kind| kind == "dispute_response"));
    Ok(())
}

#[test]
fn resolution_is_written_once_and_notifies_both_parties() -> Result<()> {
    let _guard = acquire_db_lock();
    let Some(scenario) = scenario()? else { return Ok(()) };

    let gateway = RecordingGateway::default();
    let dispute = open_manual_dispute(&scenario, &gateway, &[])?;
    let admin = scenario.db.insert_user("admin")?;
    let mut conn = scenario.db.conn()?;

    let dispute = disputes::mark_under_review(&mut conn, &dispute, now())?;
    assert_eq!(dispute.status, disputes::STATUS_UNDER_REVIEW);

    let resolved_at = now();
    let resolved = disputes::resolve(
        &mut conn,
        &gateway,
        &dispute,
        disputes::RESOLUTION_SHARED_FAULT,
        "both parties share responsibility",
        Some("escalated twice"),
        admin.id,
        resolved_at,
    )?;
    assert_eq!(resolved.status, disputes::STATUS_RESOLVED);
    assert_eq!(
        resolved.resolution.as_deref(),
        Some(disputes::RESOLUTION_SHARED_FAULT)
    );
    assert_eq!(resolved.resolved_by, Some(admin.id));
    assert_eq!(resolved.resolved_at, Some(resolved_at));

    for party in [scenario.owner.id, scenario.partner.id] {
        let kinds = queued_kinds_for(&scenario.db, party)?;
        assert!(kinds.iter().any(|kind| kind == "dispute_resolved"));
    }

    // A second resolution attempt fails without touching the first outcome.
    let again = disputes::resolve(
        &mut conn,
        &gateway,
        &resolved,
        disputes::RESOLUTION_NO_ACTION,
        "changed my mind",
        None,
        admin.id,
        now(),
    );
    assert!(matches!(again, Err(EngineError::InvalidTransition { .. })));
    let reloaded = disputes::find_dispute(&mut conn, resolved.id)?;
    assert_eq!(
        reloaded.resolution.as_deref(),
        Some(disputes::RESOLUTION_SHARED_FAULT)
    );
    assert_eq!(
        reloaded.resolution_notes.as_deref(),
        Some("both parties share responsibility")
    );
    Ok(())
}

#[test]
fn unknown_resolution_is_rejected_before_any_write() -> Result<()> {
    let _guard = acquire_db_lock();
    let Some(scenario) = scenario()? else { return Ok(()) };

    let gateway = RecordingGateway::default();
    let dispute = open_manual_dispute(&scenario, &gateway, &[])?;
    let admin = scenario.db.insert_user("admin")?;
    let mut conn = scenario.db.conn()?;

    let err = disputes::resolve(
        &mut conn,
        &gateway,
        &dispute,
        "split_the_difference",
        "",
        None,
        admin.id,
        now(),
    );
    assert!(matches!(err, Err(EngineError::Validation(_))));

    let reloaded = disputes::find_dispute(&mut conn, dispute.id)?;
    assert_eq!(reloaded.status, disputes::STATUS_OPEN);
    assert!(reloaded.resolution.is_none());
    Ok(())
}

#[test]
fn only_the_initiator_may_close() -> Result<()> {
    let _guard = acquire_db_lock();
    let Some(scenario) = scenario()? else { return Ok(()) };

    let gateway = RecordingGateway::default();
    let dispute = open_manual_dispute(&scenario, &gateway, &[])?;
    let mut conn = scenario.db.conn()?;

    let refused = disputes::close(&mut conn, &gateway, &dispute, scenario.partner.id, now());
    assert!(matches!(refused, Err(EngineError::Forbidden(_))));

    let closed = disputes::close(&mut conn, &gateway, &dispute, scenario.owner.id, now())?;
    assert_eq!(closed.status, disputes::STATUS_CLOSED);

    let kinds = queued_kinds_for(&scenario.db, scenario.partner.id)?;
    assert!(kinds.iter().any(|kind| kind == "dispute_closed"));
    Ok(())
}

#[test]
fn auto_dispute_gate_respects_existing_open_dispute() -> Result<()> {
    let _guard = acquire_db_lock();
    let Some(scenario) = scenario()? else { return Ok(()) };

    let mut conn = scenario.db.conn()?;

    let first = disputes::open_auto_dispute(
        &mut conn,
        &scenario.collaboration,
        scenario.partner.id,
        now(),
    )?;
    let first = first.expect("gate should be open for the first auto-dispute");
    assert_eq!(first.kind, disputes::KIND_DEADLINE);
    assert!(disputes::is_auto_opened(&first));
    assert!(disputes::has_open_dispute(&mut conn, scenario.collaboration.id)?);

    let second = disputes::open_auto_dispute(
        &mut conn,
        &scenario.collaboration,
        scenario.partner.id,
        now(),
    )?;
    assert!(second.is_none());
    Ok(())
}
