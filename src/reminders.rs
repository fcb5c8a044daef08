use chrono::{Duration, NaiveDateTime};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborations;
use crate::disputes;
use crate::error::{is_unique_violation, EngineError, EngineResult};
use crate::models::{NewReminder, Reminder};
use crate::notifications::{self, DeliveryGateway};
use crate::schema::reminders;

pub const KIND_DAY_3: &str = "day_3";
pub const KIND_DAY_7: &str = "day_7";
pub const KIND_DAY_14: &str = "day_14";
pub const KIND_AUTO_DISPUTE: &str = "auto_dispute";

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_SENT: &str = "sent";
pub const STATUS_CANCELLED: &str = "cancelled";
pub const STATUS_FAILED: &str = "failed";

const SCHEDULED_KINDS: [&str; 3] = [KIND_DAY_3, KIND_DAY_7, KIND_DAY_14];

pub fn offset_days(kind: &str) -> i64 {
    match kind {
        KIND_DAY_3 => 3,
        KIND_DAY_7 => 7,
        KIND_DAY_14 | KIND_AUTO_DISPUTE => 14,
        _ => 3,
    }
}

/// Materializes the day-3/7/14 reminders for a collaboration entering
/// In Progress. Each insert is best-effort: a duplicate of one kind (the
/// `(collaboration_request_id, user_id, kind)` unique constraint) is logged
/// and skipped without aborting the rest, which makes replays of the same
/// transition harmless. Returns the number actually created.
pub fn schedule_all(
    conn: &mut PgConnection,
    collaboration_id: Uuid,
    user_id: Uuid,
    now: NaiveDateTime,
) -> EngineResult<usize> {
    let mut created = 0usize;

    for kind in SCHEDULED_KINDS {
        let new_reminder = NewReminder {
            id: Uuid::new_v4(),
            collaboration_request_id: collaboration_id,
            user_id,
            kind: kind.to_string(),
            status: STATUS_PENDING.to_string(),
            scheduled_at: now + Duration::days(offset_days(kind)),
        };

        match diesel::insert_into(reminders::table)
            .values(&new_reminder)
            .execute(conn)
        {
            Ok(_) => created += 1,
            Err(err) if is_unique_violation(&err) => {
                debug!(
                    collaboration_id = %collaboration_id,
                    user_id = %user_id,
                    kind,
                    "reminder already scheduled, skipping"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(created)
}

/// The reminder sweep's work queue: pending and past due, oldest first.
pub fn due(
    conn: &mut PgConnection,
    now: NaiveDateTime,
    kind_filter: Option<&str>,
    limit: i64,
) -> EngineResult<Vec<Reminder>> {
    let mut query = reminders::table
        .filter(reminders::status.eq(STATUS_PENDING))
        .filter(reminders::scheduled_at.le(now))
        .order(reminders::scheduled_at.asc())
        .limit(limit)
        .into_boxed();

    if let Some(kind) = kind_filter {
        query = query.filter(reminders::kind.eq(kind.to_string()));
    }

    Ok(query.load(conn)?)
}

pub fn default_message(kind: &str, user_name: &str, collaboration_title: &str) -> String {
    match kind {
        KIND_DAY_3 => format!(
            "Hi {user_name}! It's been 3 days since your collaboration '{collaboration_title}' \
             was marked as in progress. How's it going?"
        ),
        KIND_DAY_7 => format!(
            "Hi {user_name}! It's been a week since your collaboration '{collaboration_title}' \
             was started. Any updates on the progress?"
        ),
        KIND_DAY_14 => format!(
            "Hi {user_name}! It's been 14 days since your collaboration '{collaboration_title}' \
             began. Please provide an update on the current status."
        ),
        KIND_AUTO_DISPUTE => format!(
            "Hi {user_name}! Your collaboration '{collaboration_title}' has been in progress \
             for 14 days without completion. A dispute has been automatically opened to help \
             resolve any issues."
        ),
        _ => format!("Reminder for collaboration: {collaboration_title}"),
    }
}

/// Delivers one due reminder and marks it sent. A delivery failure marks the
/// reminder failed and propagates; failed reminders are surfaced for manual
/// re-send rather than re-entering the sweep, so a permanently broken
/// recipient cannot loop forever. A successfully sent day-14 reminder then
/// runs the auto-dispute escalation.
pub fn fire(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    reminder: &Reminder,
    now: NaiveDateTime,
) -> EngineResult<Reminder> {
    if reminder.status != STATUS_PENDING {
        return Err(EngineError::invalid_transition(
            "reminder",
            &reminder.status,
            vec![],
        ));
    }

    let collaboration = collaborations::find_collaboration(conn, reminder.collaboration_request_id)?;
    let user = notifications::find_user(conn, reminder.user_id)?;

    let message = match &reminder.message {
        Some(message) => message.clone(),
        None => {
            let generated = default_message(&reminder.kind, &user.name, &collaboration.title);
            diesel::update(reminders::table.find(reminder.id))
                .set((
                    reminders::message.eq(&generated),
                    reminders::updated_at.eq(now),
                ))
                .execute(conn)?;
            generated
        }
    };

    let days_since_in_progress = (now - collaboration.updated_at).num_days().max(0);
    let payload = json!({
        "reminder_id": reminder.id,
        "collaboration_title": collaboration.title,
        "type": reminder.kind,
        "message": message,
        "days_since_in_progress": days_since_in_progress,
    });

    if let Err(err) = notifications::send(
        conn,
        gateway,
        reminder.user_id,
        "collaboration_reminder",
        payload,
        true,
        now,
    ) {
        mark_failed(conn, reminder.id, now)?;
        return Err(err);
    }

    diesel::update(reminders::table.find(reminder.id))
        .set((
            reminders::status.eq(STATUS_SENT),
            reminders::sent_at.eq(now),
            reminders::updated_at.eq(now),
        ))
        .execute(conn)?;

    if reminder.kind == KIND_DAY_14 {
        escalate_day_14(conn, gateway, reminder, now)?;
    }

    Ok(reminders::table.find(reminder.id).first(conn)?)
}

/// Day-14 escalation: if the collaboration is still In Progress and no
/// open/under-review dispute exists for it, open a deadline dispute with the
/// owner as initiator and the reminded user as respondent. The existence gate
/// dedups at collaboration granularity, so with several collaborators only
/// the first day-14 reminder to fire escalates.
fn escalate_day_14(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    reminder: &Reminder,
    now: NaiveDateTime,
) -> EngineResult<()> {
    let collaboration = collaborations::find_collaboration(conn, reminder.collaboration_request_id)?;
    if collaboration.status != collaborations::STATUS_IN_PROGRESS {
        return Ok(());
    }

    let dispute = match disputes::open_auto_dispute(conn, &collaboration, reminder.user_id, now)? {
        Some(dispute) => dispute,
        None => {
            debug!(
                collaboration_id = %collaboration.id,
                "open dispute already exists, skipping auto-dispute"
            );
            return Ok(());
        }
    };

    info!(
        collaboration_id = %collaboration.id,
        dispute_id = %dispute.id,
        respondent_id = %reminder.user_id,
        "auto-opened dispute after day-14 reminder"
    );

    // Fire-and-forget: the dispute is already committed, a notification
    // hiccup here must not fail the reminder.
    if let Err(err) = notifications::send(
        conn,
        gateway,
        reminder.user_id,
        "auto_dispute_opened",
        json!({
            "collaboration_title": collaboration.title,
            "dispute_type": disputes::KIND_DEADLINE,
        }),
        false,
        now,
    ) {
        warn!(
            dispute_id = %dispute.id,
            error = %err,
            "failed to notify respondent about auto-dispute"
        );
    }

    Ok(())
}

pub fn mark_failed(
    conn: &mut PgConnection,
    reminder_id: Uuid,
    now: NaiveDateTime,
) -> EngineResult<()> {
    diesel::update(reminders::table.find(reminder_id))
        .set((
            reminders::status.eq(STATUS_FAILED),
            reminders::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

/// Cancels a single pending reminder; anything already sent, failed or
/// cancelled is rejected.
pub fn cancel(
    conn: &mut PgConnection,
    reminder: &Reminder,
    now: NaiveDateTime,
) -> EngineResult<Reminder> {
    if reminder.status != STATUS_PENDING {
        return Err(EngineError::invalid_transition(
            "reminder",
            &reminder.status,
            vec![],
        ));
    }

    diesel::update(reminders::table.find(reminder.id))
        .set((
            reminders::status.eq(STATUS_CANCELLED),
            reminders::cancelled_at.eq(now),
            reminders::updated_at.eq(now),
        ))
        .execute(conn)?;

    Ok(reminders::table.find(reminder.id).first(conn)?)
}

/// Bulk-cancels every pending reminder for a collaboration; used when the
/// collaboration reaches a terminal status.
pub fn cancel_all_for_collaboration(
    conn: &mut PgConnection,
    collaboration_id: Uuid,
    now: NaiveDateTime,
) -> EngineResult<usize> {
    let cancelled = diesel::update(
        reminders::table
            .filter(reminders::collaboration_request_id.eq(collaboration_id))
            .filter(reminders::status.eq(STATUS_PENDING)),
    )
    .set((
        reminders::status.eq(STATUS_CANCELLED),
        reminders::cancelled_at.eq(now),
        reminders::updated_at.eq(now),
    ))
    .execute(conn)?;

    Ok(cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_follow_reminder_cadence() {
        assert_eq!(offset_days(KIND_DAY_3), 3);
        assert_eq!(offset_days(KIND_DAY_7), 7);
        assert_eq!(offset_days(KIND_DAY_14), 14);
        assert_eq!(offset_days(KIND_AUTO_DISPUTE), 14);
        assert_eq!(offset_days("unknown"), 3);
    }

    #[test]
    fn default_messages_name_user_and_collaboration() {
        for kind in [KIND_DAY_3, KIND_DAY_7, KIND_DAY_14, KIND_AUTO_DISPUTE] {
            let message = default_message(kind, "Ava", "Logo refresh");
            assert!(message.contains("Ava"), "{kind}: {message}");
            assert!(message.contains("Logo refresh"), "{kind}: {message}");
        }
    }

    #[test]
    fn day_7_message_mentions_a_week() {
        assert!(default_message(KIND_DAY_7, "Ava", "Logo refresh").contains("a week"));
    }

    #[test]
    fn unknown_kind_gets_generic_message() {
        let message = default_message("someday", "Ava", "Logo refresh");
        assert_eq!(message, "Reminder for collaboration: Logo refresh");
    }
}
