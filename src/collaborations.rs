use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{CollaborationRequest, NewCollaborationRequest};
use crate::reminders;
use crate::schema::collaboration_requests;

pub const STATUS_DRAFT: &str = "Draft";
pub const STATUS_OPEN: &str = "Open";
pub const STATUS_REVIEWING: &str = "Reviewing Applicants";
pub const STATUS_IN_PROGRESS: &str = "In Progress";
pub const STATUS_COMPLETED: &str = "Completed";
pub const STATUS_CANCELLED: &str = "Cancelled";

pub const ALL_STATUSES: [&str; 6] = [
    STATUS_DRAFT,
    STATUS_OPEN,
    STATUS_REVIEWING,
    STATUS_IN_PROGRESS,
    STATUS_COMPLETED,
    STATUS_CANCELLED,
];

const SHARE_TOKEN_LEN: usize = 32;

pub fn can_transition_to(current: &str, target: &str) -> bool {
    let allowed: &[&str] = match current {
        STATUS_DRAFT => &[STATUS_OPEN],
        STATUS_OPEN => &[STATUS_REVIEWING, STATUS_CANCELLED],
        STATUS_REVIEWING => &[STATUS_IN_PROGRESS, STATUS_CANCELLED],
        STATUS_IN_PROGRESS => &[STATUS_COMPLETED, STATUS_CANCELLED],
        _ => &[],
    };
    allowed.contains(&target)
}

/// Legal next statuses from `current`, computed by filtering the full status
/// set so error messages always match the transition table.
pub fn allowed_transitions(current: &str) -> Vec<&'static str> {
    ALL_STATUSES
        .into_iter()
        .filter(|target| can_transition_to(current, target))
        .collect()
}

pub fn is_terminal(status: &str) -> bool {
    status == STATUS_COMPLETED || status == STATUS_CANCELLED
}

/// Draft/Open requests with no lifecycle history behind them can still be
/// edited by their owner.
pub fn is_editable(collaboration: &CollaborationRequest) -> bool {
    collaboration.status == STATUS_DRAFT || collaboration.status == STATUS_OPEN
}

pub fn share_url(collaboration: &CollaborationRequest, app_url: &str) -> String {
    format!(
        "{}/collaborations/{}",
        app_url.trim_end_matches('/'),
        collaboration.share_token
    )
}

fn generate_share_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHARE_TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub fn find_collaboration(
    conn: &mut PgConnection,
    id: Uuid,
) -> EngineResult<CollaborationRequest> {
    collaboration_requests::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or(EngineError::NotFound {
            entity: "collaboration request",
        })
}

/// Creates a Draft request. The share token is generated exactly once here
/// and never rewritten.
pub fn create_collaboration(
    conn: &mut PgConnection,
    owner_id: Uuid,
    title: &str,
    description: &str,
    deadline: Option<NaiveDateTime>,
) -> EngineResult<CollaborationRequest> {
    let new_request = NewCollaborationRequest {
        id: Uuid::new_v4(),
        user_id: owner_id,
        title: title.to_string(),
        description: description.to_string(),
        status: STATUS_DRAFT.to_string(),
        deadline,
        share_token: generate_share_token(),
    };

    diesel::insert_into(collaboration_requests::table)
        .values(&new_request)
        .execute(conn)?;

    Ok(collaboration_requests::table.find(new_request.id).first(conn)?)
}

/// Moves a collaboration to `target` and runs the post-transition hooks:
/// entering In Progress schedules the owner's reminders, entering a terminal
/// status cancels whatever reminders are still pending. The reminder batch is
/// guarded by its per-kind unique constraint, so a retried sweep replaying
/// this transition cannot duplicate reminders.
pub fn transition(
    conn: &mut PgConnection,
    collaboration: &CollaborationRequest,
    target: &str,
    now: NaiveDateTime,
) -> EngineResult<CollaborationRequest> {
    if !can_transition_to(&collaboration.status, target) {
        return Err(EngineError::invalid_transition(
            "collaboration request",
            &collaboration.status,
            allowed_transitions(&collaboration.status),
        ));
    }

    diesel::update(collaboration_requests::table.find(collaboration.id))
        .set((
            collaboration_requests::status.eq(target),
            collaboration_requests::updated_at.eq(now),
        ))
        .execute(conn)?;

    info!(
        collaboration_id = %collaboration.id,
        from = %collaboration.status,
        to = target,
        "collaboration status changed"
    );

    if target == STATUS_IN_PROGRESS {
        reminders::schedule_all(conn, collaboration.id, collaboration.user_id, now)?;
    } else if is_terminal(target) {
        let cancelled =
            reminders::cancel_all_for_collaboration(conn, collaboration.id, now)?;
        if cancelled > 0 {
            info!(
                collaboration_id = %collaboration.id,
                cancelled,
                "cancelled pending reminders for terminal collaboration"
            );
        }
    }

    Ok(collaboration_requests::table.find(collaboration.id).first(conn)?)
}

/// Auto-cancels an Open request whose deadline has passed. Idempotent: a
/// request in any other state (including already Cancelled) is a no-op.
pub fn check_and_auto_close(
    conn: &mut PgConnection,
    collaboration: &CollaborationRequest,
    now: NaiveDateTime,
) -> EngineResult<bool> {
    let expired = collaboration.status == STATUS_OPEN
        && collaboration
            .deadline
            .map(|deadline| now > deadline)
            .unwrap_or(false);

    if !expired {
        return Ok(false);
    }

    transition(conn, collaboration, STATUS_CANCELLED, now)?;
    Ok(true)
}

/// Requests visible to applicants: anything between publication and the end
/// of the engagement.
pub fn active(conn: &mut PgConnection) -> EngineResult<Vec<CollaborationRequest>> {
    let rows = collaboration_requests::table
        .filter(collaboration_requests::status.eq_any([
            STATUS_OPEN,
            STATUS_REVIEWING,
            STATUS_IN_PROGRESS,
        ]))
        .order(collaboration_requests::created_at.desc())
        .load(conn)?;
    Ok(rows)
}
