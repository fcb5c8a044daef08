use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use tracing::{error, info, warn};

use crate::collaborations;
use crate::error::EngineResult;
use crate::models::CollaborationRequest;
use crate::notifications::{self, DeliveryGateway};
use crate::reminders;
use crate::schema::collaboration_requests;

/// Counts reported by one reminder sweep run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReminderSweepOutcome {
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
}

/// Auto-closes Open collaborations whose deadline has passed, in bounded
/// chunks. Safe to run concurrently with itself: a row another sweep already
/// cancelled simply stops matching the query, and `check_and_auto_close` is a
/// no-op on anything not Open. Returns the number closed.
pub fn run_deadline_sweep(
    conn: &mut PgConnection,
    now: NaiveDateTime,
    chunk_size: i64,
) -> EngineResult<usize> {
    let mut closed = 0usize;

    loop {
        let batch: Vec<CollaborationRequest> = collaboration_requests::table
            .filter(collaboration_requests::status.eq(collaborations::STATUS_OPEN))
            .filter(collaboration_requests::deadline.is_not_null())
            .filter(collaboration_requests::deadline.lt(now))
            .order(collaboration_requests::deadline.asc())
            .limit(chunk_size)
            .load(conn)?;

        if batch.is_empty() {
            break;
        }

        let mut progressed = false;
        for collaboration in &batch {
            match collaborations::check_and_auto_close(conn, collaboration, now) {
                Ok(true) => {
                    closed += 1;
                    progressed = true;
                    info!(
                        collaboration_id = %collaboration.id,
                        "auto-closed expired collaboration"
                    );
                }
                Ok(false) => progressed = true,
                Err(err) => {
                    error!(
                        collaboration_id = %collaboration.id,
                        error = %err,
                        "failed to auto-close collaboration"
                    );
                }
            }
        }

        // A row that errored stays Open and would be re-selected; bail out
        // once a whole chunk makes no progress and let the next tick retry.
        if !progressed {
            warn!("deadline sweep made no progress, stopping early");
            break;
        }
    }

    Ok(closed)
}

/// Re-attempts failed notification deliveries below the retry ceiling.
/// Returns the number recovered.
pub fn run_notification_retry_sweep(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    now: NaiveDateTime,
    chunk_size: i64,
) -> EngineResult<usize> {
    notifications::retry_failed(conn, gateway, now, chunk_size)
}

/// Fires every due reminder (optionally a single kind), escalating day-14
/// reminders per the auto-dispute rule. One failing reminder never aborts the
/// batch: it is marked failed, counted, and the sweep moves on.
pub fn run_reminder_sweep(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    now: NaiveDateTime,
    kind_filter: Option<&str>,
    chunk_size: i64,
) -> EngineResult<ReminderSweepOutcome> {
    let mut outcome = ReminderSweepOutcome::default();

    loop {
        let batch = reminders::due(conn, now, kind_filter, chunk_size)?;
        if batch.is_empty() {
            break;
        }

        for reminder in &batch {
            match reminders::fire(conn, gateway, reminder, now) {
                Ok(_) => {
                    outcome.sent += 1;
                    info!(
                        reminder_id = %reminder.id,
                        kind = %reminder.kind,
                        user_id = %reminder.user_id,
                        "reminder sent"
                    );
                }
                Err(err) => {
                    outcome.failed += 1;
                    error!(
                        reminder_id = %reminder.id,
                        kind = %reminder.kind,
                        error = %err,
                        "failed to send reminder"
                    );
                    // Delivery failures are already marked by fire(); this
                    // covers load errors so the row leaves the due queue
                    // instead of wedging the sweep.
                    if let Err(mark_err) = reminders::mark_failed(conn, reminder.id, now) {
                        error!(
                            reminder_id = %reminder.id,
                            error = %mark_err,
                            "failed to mark reminder failed"
                        );
                        outcome.total = outcome.sent + outcome.failed;
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    outcome.total = outcome.sent + outcome.failed;
    Ok(outcome)
}
