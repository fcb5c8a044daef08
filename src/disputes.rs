use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborations;
use crate::error::{EngineError, EngineResult};
use crate::models::{Dispute, NewDispute};
use crate::notifications::{self, DeliveryGateway};
use crate::schema::disputes;

pub const STATUS_OPEN: &str = "open";
pub const STATUS_UNDER_REVIEW: &str = "under_review";
pub const STATUS_RESOLVED: &str = "resolved";
pub const STATUS_CLOSED: &str = "closed";

pub const ALL_STATUSES: [&str; 4] = [
    STATUS_OPEN,
    STATUS_UNDER_REVIEW,
    STATUS_RESOLVED,
    STATUS_CLOSED,
];

pub const KIND_PAYMENT: &str = "payment";
pub const KIND_QUALITY: &str = "quality";
pub const KIND_DEADLINE: &str = "deadline";
pub const KIND_COMMUNICATION: &str = "communication";
pub const KIND_OTHER: &str = "other";

pub const RESOLUTION_PAYOUT_TO_REQUESTOR: &str = "payout_to_requestor";
pub const RESOLUTION_REFUND_TO_APPLICANTS: &str = "refund_to_applicants";
pub const RESOLUTION_SHARED_FAULT: &str = "shared_fault";
pub const RESOLUTION_NO_ACTION: &str = "no_action";

pub const ALL_RESOLUTIONS: [&str; 4] = [
    RESOLUTION_PAYOUT_TO_REQUESTOR,
    RESOLUTION_REFUND_TO_APPLICANTS,
    RESOLUTION_SHARED_FAULT,
    RESOLUTION_NO_ACTION,
];

const AUTO_DISPUTE_DESCRIPTION: &str =
    "Auto-opened dispute due to collaboration not being completed within 14 days.";

/// One entry in the append-only evidence log. Entries are only ever pushed,
/// never edited or removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub content: String,
    pub submitted_by: Uuid,
    pub submitted_at: NaiveDateTime,
}

pub fn can_transition_to(current: &str, target: &str) -> bool {
    let allowed: &[&str] = match current {
        STATUS_OPEN => &[STATUS_UNDER_REVIEW, STATUS_RESOLVED, STATUS_CLOSED],
        STATUS_UNDER_REVIEW => &[STATUS_RESOLVED, STATUS_CLOSED],
        STATUS_RESOLVED => &[STATUS_CLOSED],
        _ => &[],
    };
    allowed.contains(&target)
}

pub fn allowed_transitions(current: &str) -> Vec<&'static str> {
    ALL_STATUSES
        .into_iter()
        .filter(|target| can_transition_to(current, target))
        .collect()
}

pub fn can_be_resolved(dispute: &Dispute) -> bool {
    dispute.status == STATUS_OPEN || dispute.status == STATUS_UNDER_REVIEW
}

pub fn is_involved(dispute: &Dispute, user_id: Uuid) -> bool {
    dispute.initiator_id == user_id || dispute.respondent_id == user_id
}

pub fn is_auto_opened(dispute: &Dispute) -> bool {
    dispute.auto_opened_at.is_some()
}

pub fn find_dispute(conn: &mut PgConnection, id: Uuid) -> EngineResult<Dispute> {
    disputes::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or(EngineError::NotFound { entity: "dispute" })
}

/// True when the collaboration already has a dispute in open or under_review.
pub fn has_open_dispute(conn: &mut PgConnection, collaboration_id: Uuid) -> EngineResult<bool> {
    let count: i64 = disputes::table
        .filter(disputes::collaboration_request_id.eq(collaboration_id))
        .filter(disputes::status.eq_any([STATUS_OPEN, STATUS_UNDER_REVIEW]))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

pub fn disputes_for_user(conn: &mut PgConnection, user_id: Uuid) -> EngineResult<Vec<Dispute>> {
    let rows = disputes::table
        .filter(
            disputes::initiator_id
                .eq(user_id)
                .or(disputes::respondent_id.eq(user_id)),
        )
        .order(disputes::created_at.desc())
        .load(conn)?;
    Ok(rows)
}

pub struct OpenDisputeParams<'a> {
    pub collaboration_id: Uuid,
    pub initiator_id: Uuid,
    pub respondent_id: Uuid,
    pub kind: &'a str,
    pub description: &'a str,
    pub evidence_links: &'a [String],
}

/// Opens a dispute on behalf of a party. Rejected when a dispute in
/// {open, under_review} for the same collaboration already involves the
/// initiator as either party — parallel disputes over one engagement are not
/// allowed, but a fresh dispute is fine once the earlier one is resolved or
/// closed. The respondent is notified.
pub fn open_dispute(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    params: OpenDisputeParams<'_>,
    now: NaiveDateTime,
) -> EngineResult<Dispute> {
    let collaboration = collaborations::find_collaboration(conn, params.collaboration_id)?;
    let initiator = notifications::find_user(conn, params.initiator_id)?;

    let overlapping: i64 = disputes::table
        .filter(disputes::collaboration_request_id.eq(params.collaboration_id))
        .filter(disputes::status.eq_any([STATUS_OPEN, STATUS_UNDER_REVIEW]))
        .filter(
            disputes::initiator_id
                .eq(params.initiator_id)
                .or(disputes::respondent_id.eq(params.initiator_id)),
        )
        .count()
        .get_result(conn)?;

    if overlapping > 0 {
        return Err(EngineError::Duplicate(
            "a dispute already exists for this collaboration".to_string(),
        ));
    }

    let evidence: Vec<EvidenceEntry> = params
        .evidence_links
        .iter()
        .map(|link| EvidenceEntry {
            entry_type: "evidence".to_string(),
            content: link.clone(),
            submitted_by: params.initiator_id,
            submitted_at: now,
        })
        .collect();

    let new_dispute = NewDispute {
        id: Uuid::new_v4(),
        collaboration_request_id: params.collaboration_id,
        initiator_id: params.initiator_id,
        respondent_id: params.respondent_id,
        status: STATUS_OPEN.to_string(),
        kind: params.kind.to_string(),
        description: params.description.to_string(),
        evidence: serde_json::to_value(&evidence)?,
        auto_opened_at: None,
    };

    diesel::insert_into(disputes::table)
        .values(&new_dispute)
        .execute(conn)?;
    let dispute: Dispute = disputes::table.find(new_dispute.id).first(conn)?;

    notify_quietly(
        conn,
        gateway,
        dispute.respondent_id,
        "dispute_opened",
        json!({
            "dispute_id": dispute.id,
            "collaboration_title": collaboration.title,
            "initiator_name": initiator.name,
            "type": dispute.kind,
        }),
        now,
    );

    Ok(dispute)
}

/// System-opened deadline dispute used by the day-14 escalation. The
/// open-dispute gate is re-checked inside the insert transaction so two due
/// day-14 reminders for the same collaboration processed back to back still
/// produce exactly one dispute. Returns None when the gate is closed.
pub fn open_auto_dispute(
    conn: &mut PgConnection,
    collaboration: &crate::models::CollaborationRequest,
    respondent_id: Uuid,
    now: NaiveDateTime,
) -> EngineResult<Option<Dispute>> {
    let collaboration_id = collaboration.id;
    let initiator_id = collaboration.user_id;

    let inserted = conn.transaction::<Option<Uuid>, diesel::result::Error, _>(|conn| {
        let existing: i64 = disputes::table
            .filter(disputes::collaboration_request_id.eq(collaboration_id))
            .filter(disputes::status.eq_any([STATUS_OPEN, STATUS_UNDER_REVIEW]))
            .count()
            .get_result(conn)?;

        if existing > 0 {
            return Ok(None);
        }

        let new_dispute = NewDispute {
            id: Uuid::new_v4(),
            collaboration_request_id: collaboration_id,
            initiator_id,
            respondent_id,
            status: STATUS_OPEN.to_string(),
            kind: KIND_DEADLINE.to_string(),
            description: AUTO_DISPUTE_DESCRIPTION.to_string(),
            evidence: serde_json::Value::Array(Vec::new()),
            auto_opened_at: Some(now),
        };

        diesel::insert_into(disputes::table)
            .values(&new_dispute)
            .execute(conn)?;
        Ok(Some(new_dispute.id))
    })?;

    match inserted {
        Some(id) => Ok(Some(disputes::table.find(id).first(conn)?)),
        None => Ok(None),
    }
}

/// Appends the respondent's response (plus any evidence links) to the
/// evidence log and notifies the initiator. Only the respondent may respond,
/// and only while the dispute is open or under review.
pub fn respond(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    dispute: &Dispute,
    responder_id: Uuid,
    response: &str,
    evidence_links: &[String],
    now: NaiveDateTime,
) -> EngineResult<Dispute> {
    if dispute.respondent_id != responder_id {
        return Err(EngineError::Forbidden(
            "only the respondent can respond to this dispute".to_string(),
        ));
    }
    if dispute.status != STATUS_OPEN && dispute.status != STATUS_UNDER_REVIEW {
        return Err(EngineError::invalid_transition(
            "dispute",
            &dispute.status,
            allowed_transitions(&dispute.status),
        ));
    }

    let mut log: Vec<EvidenceEntry> = serde_json::from_value(dispute.evidence.clone())?;
    log.push(EvidenceEntry {
        entry_type: "response".to_string(),
        content: response.to_string(),
        submitted_by: responder_id,
        submitted_at: now,
    });
    for link in evidence_links {
        log.push(EvidenceEntry {
            entry_type: "evidence".to_string(),
            content: link.clone(),
            submitted_by: responder_id,
            submitted_at: now,
        });
    }

    diesel::update(disputes::table.find(dispute.id))
        .set((
            disputes::evidence.eq(serde_json::to_value(&log)?),
            disputes::updated_at.eq(now),
        ))
        .execute(conn)?;

    let collaboration =
        collaborations::find_collaboration(conn, dispute.collaboration_request_id)?;
    let respondent = notifications::find_user(conn, responder_id)?;
    notify_quietly(
        conn,
        gateway,
        dispute.initiator_id,
        "dispute_response",
        json!({
            "dispute_id": dispute.id,
            "collaboration_title": collaboration.title,
            "respondent_name": respondent.name,
        }),
        now,
    );

    Ok(disputes::table.find(dispute.id).first(conn)?)
}

pub fn mark_under_review(
    conn: &mut PgConnection,
    dispute: &Dispute,
    now: NaiveDateTime,
) -> EngineResult<Dispute> {
    if !can_transition_to(&dispute.status, STATUS_UNDER_REVIEW) {
        return Err(EngineError::invalid_transition(
            "dispute",
            &dispute.status,
            allowed_transitions(&dispute.status),
        ));
    }

    diesel::update(disputes::table.find(dispute.id))
        .set((
            disputes::status.eq(STATUS_UNDER_REVIEW),
            disputes::updated_at.eq(now),
        ))
        .execute(conn)?;

    Ok(disputes::table.find(dispute.id).first(conn)?)
}

/// Resolves a dispute: resolution, notes, resolver and timestamp land in the
/// same write as the status flip. Attempts from resolved/closed fail before
/// anything is written, so no partial notification can go out. Both parties
/// are notified on success.
pub fn resolve(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    dispute: &Dispute,
    resolution: &str,
    resolution_notes: &str,
    admin_notes: Option<&str>,
    admin_id: Uuid,
    now: NaiveDateTime,
) -> EngineResult<Dispute> {
    if !ALL_RESOLUTIONS.contains(&resolution) {
        return Err(EngineError::Validation(format!(
            "unknown resolution '{resolution}'"
        )));
    }
    if !can_be_resolved(dispute) {
        return Err(EngineError::invalid_transition(
            "dispute",
            &dispute.status,
            allowed_transitions(&dispute.status),
        ));
    }

    diesel::update(disputes::table.find(dispute.id))
        .set((
            disputes::status.eq(STATUS_RESOLVED),
            disputes::resolution.eq(resolution),
            disputes::resolution_notes.eq(resolution_notes),
            disputes::admin_notes.eq(admin_notes),
            disputes::resolved_by.eq(admin_id),
            disputes::resolved_at.eq(now),
            disputes::updated_at.eq(now),
        ))
        .execute(conn)?;

    info!(
        dispute_id = %dispute.id,
        resolution,
        resolved_by = %admin_id,
        "dispute resolved"
    );

    let collaboration =
        collaborations::find_collaboration(conn, dispute.collaboration_request_id)?;
    let payload = json!({
        "dispute_id": dispute.id,
        "collaboration_title": collaboration.title,
        "resolution": resolution,
        "resolution_notes": resolution_notes,
    });
    for party in [dispute.initiator_id, dispute.respondent_id] {
        notify_quietly(conn, gateway, party, "dispute_resolved", payload.clone(), now);
    }

    Ok(disputes::table.find(dispute.id).first(conn)?)
}

/// Initiator-only close, valid while the dispute is open or under review.
pub fn close(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    dispute: &Dispute,
    actor_id: Uuid,
    now: NaiveDateTime,
) -> EngineResult<Dispute> {
    if dispute.initiator_id != actor_id {
        return Err(EngineError::Forbidden(
            "only the initiator can close this dispute".to_string(),
        ));
    }
    if dispute.status != STATUS_OPEN && dispute.status != STATUS_UNDER_REVIEW {
        return Err(EngineError::invalid_transition(
            "dispute",
            &dispute.status,
            allowed_transitions(&dispute.status),
        ));
    }

    diesel::update(disputes::table.find(dispute.id))
        .set((
            disputes::status.eq(STATUS_CLOSED),
            disputes::updated_at.eq(now),
        ))
        .execute(conn)?;

    let collaboration =
        collaborations::find_collaboration(conn, dispute.collaboration_request_id)?;
    let initiator = notifications::find_user(conn, dispute.initiator_id)?;
    notify_quietly(
        conn,
        gateway,
        dispute.respondent_id,
        "dispute_closed",
        json!({
            "dispute_id": dispute.id,
            "collaboration_title": collaboration.title,
            "initiator_name": initiator.name,
        }),
        now,
    );

    Ok(disputes::table.find(dispute.id).first(conn)?)
}

/// Queued notification where failure must not unwind the already-committed
/// workflow step; errors are logged and dropped.
fn notify_quietly(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    user_id: Uuid,
    kind: &str,
    payload: serde_json::Value,
    now: NaiveDateTime,
) {
    if let Err(err) = notifications::send(conn, gateway, user_id, kind, payload, false, now) {
        warn!(user_id = %user_id, kind, error = %err, "failed to queue notification");
    }
}
