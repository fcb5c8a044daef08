use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{is_unique_violation, EngineError, EngineResult};
use crate::models::{NewNotification, NewNotificationPreference, Notification, NotificationPreference, User};
use crate::schema::{notification_preferences, notifications, users};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_SENT: &str = "sent";
pub const STATUS_FAILED: &str = "failed";

pub const CHANNEL_IN_APP: &str = "in_app";
pub const CHANNEL_EMAIL: &str = "email";

/// Retry ceiling for failed deliveries. A ceiling, not a backoff schedule:
/// the retry sweep re-attempts on its own cadence and gives up for good once
/// a notification has failed this many times.
pub const MAX_RETRY_COUNT: i32 = 3;

/// Outbound delivery seam. The engine only needs success/failure back from a
/// channel; everything else (rendering, SMTP, push) lives behind this trait.
pub trait DeliveryGateway: Send + Sync {
    fn deliver(&self, channel: &str, user: &User, notification: &Notification)
        -> anyhow::Result<()>;
}

/// Default gateway: records the delivery in the log stream and succeeds.
/// In-app notifications are consumed straight from the table, so this is the
/// production behavior for that channel; email wiring replaces it.
pub struct LoggingGateway;

impl DeliveryGateway for LoggingGateway {
    fn deliver(
        &self,
        channel: &str,
        user: &User,
        notification: &Notification,
    ) -> anyhow::Result<()> {
        info!(
            channel,
            user_id = %user.id,
            notification_id = %notification.id,
            kind = %notification.kind,
            "delivered notification"
        );
        Ok(())
    }
}

pub fn find_user(conn: &mut PgConnection, user_id: Uuid) -> EngineResult<User> {
    users::table
        .find(user_id)
        .first(conn)
        .optional()?
        .ok_or(EngineError::NotFound { entity: "user" })
}

/// Preference rows are created lazily with every flag defaulting to true.
pub fn preferences_for(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> EngineResult<NotificationPreference> {
    if let Some(prefs) = notification_preferences::table
        .find(user_id)
        .first(conn)
        .optional()?
    {
        return Ok(prefs);
    }

    match diesel::insert_into(notification_preferences::table)
        .values(&NewNotificationPreference { user_id })
        .execute(conn)
    {
        Ok(_) => {}
        // A concurrent first access created the row between our read and
        // insert; the reload below picks it up.
        Err(err) if is_unique_violation(&err) => {}
        Err(err) => return Err(err.into()),
    }

    Ok(notification_preferences::table.find(user_id).first(conn)?)
}

/// Maps a notification kind to the preference category that gates it.
/// Kinds without a mapping are always delivered.
pub fn category_for(kind: &str) -> Option<&'static str> {
    match kind {
        "dispute_opened" | "dispute_response" | "dispute_resolved" | "dispute_closed"
        | "auto_dispute_opened" => Some("dispute_events"),
        "report_reviewed" => Some("report_events"),
        "collaboration_reminder" => Some("reminder_events"),
        "admin_warning" | "account_suspended" => Some("admin_events"),
        "new_application" | "application_accepted" | "application_rejected"
        | "application_withdrawn" => Some("application_status"),
        "request_closed" | "request_cancelled" | "collaboration_complete" => {
            Some("request_status")
        }
        "new_message" => Some("new_message"),
        _ => None,
    }
}

pub fn is_enabled(prefs: &NotificationPreference, kind: &str) -> bool {
    match category_for(kind) {
        Some("dispute_events") => prefs.dispute_events,
        Some("report_events") => prefs.report_events,
        Some("reminder_events") => prefs.reminder_events,
        Some("admin_events") => prefs.admin_events,
        Some("application_status") => prefs.application_status,
        Some("request_status") => prefs.request_status,
        Some("new_message") => prefs.new_message,
        _ => true,
    }
}

/// Delivers `kind` to the user through every channel their preferences allow.
///
/// A disabled category is a silent no-op that creates nothing. One
/// notification row is created per enabled channel; queued sends leave the
/// row pending, immediate sends attempt delivery right away. Channel failures
/// are recorded per notification, and the first one is re-raised only when
/// `immediate` is set — fire-and-forget callers get Ok with the rows.
pub fn send(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    user_id: Uuid,
    kind: &str,
    payload: Value,
    immediate: bool,
    now: NaiveDateTime,
) -> EngineResult<Vec<Notification>> {
    let user = find_user(conn, user_id)?;
    let prefs = preferences_for(conn, user_id)?;

    if !is_enabled(&prefs, kind) {
        debug!(user_id = %user_id, kind, "notification suppressed by preferences");
        return Ok(Vec::new());
    }

    let mut channels = Vec::new();
    if prefs.in_app_enabled {
        channels.push(CHANNEL_IN_APP);
    }
    if prefs.email_enabled {
        channels.push(CHANNEL_EMAIL);
    }

    let mut created = Vec::new();
    let mut first_failure: Option<anyhow::Error> = None;

    for channel in channels {
        let new_notification = NewNotification {
            id: Uuid::new_v4(),
            user_id,
            kind: kind.to_string(),
            channel: channel.to_string(),
            payload: payload.clone(),
            status: STATUS_PENDING.to_string(),
        };
        diesel::insert_into(notifications::table)
            .values(&new_notification)
            .execute(conn)?;
        let mut notification: Notification =
            notifications::table.find(new_notification.id).first(conn)?;

        if immediate {
            match gateway.deliver(channel, &user, &notification) {
                Ok(()) => {
                    diesel::update(notifications::table.find(notification.id))
                        .set((
                            notifications::status.eq(STATUS_SENT),
                            notifications::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                }
                Err(err) => {
                    warn!(
                        notification_id = %notification.id,
                        channel,
                        error = %err,
                        "notification delivery failed"
                    );
                    diesel::update(notifications::table.find(notification.id))
                        .set((
                            notifications::status.eq(STATUS_FAILED),
                            notifications::retry_count.eq(notification.retry_count + 1),
                            notifications::last_retry_at.eq(now),
                            notifications::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
            notification = notifications::table.find(notification.id).first(conn)?;
        }

        created.push(notification);
    }

    if immediate {
        if let Some(err) = first_failure {
            return Err(EngineError::Delivery(err));
        }
    }

    Ok(created)
}

/// Retry sweep over failed notifications below the retry ceiling. Returns the
/// number recovered. Rows attempted in this pass get `last_retry_at = now`, so
/// the chunked loop cannot pick the same row twice within one sweep.
pub fn retry_failed(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    now: NaiveDateTime,
    chunk_size: i64,
) -> EngineResult<usize> {
    let mut recovered = 0usize;

    loop {
        let batch: Vec<Notification> = notifications::table
            .filter(notifications::status.eq(STATUS_FAILED))
            .filter(notifications::retry_count.lt(MAX_RETRY_COUNT))
            .filter(
                notifications::last_retry_at
                    .lt(now)
                    .or(notifications::last_retry_at.is_null()),
            )
            .order(notifications::created_at.asc())
            .limit(chunk_size)
            .load(conn)?;

        if batch.is_empty() {
            break;
        }

        for notification in batch {
            let user = match find_user(conn, notification.user_id) {
                Ok(user) => user,
                Err(err) => {
                    warn!(
                        notification_id = %notification.id,
                        error = %err,
                        "skipping retry for notification without recipient"
                    );
                    diesel::update(notifications::table.find(notification.id))
                        .set((
                            notifications::retry_count.eq(notification.retry_count + 1),
                            notifications::last_retry_at.eq(now),
                            notifications::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                    continue;
                }
            };

            match gateway.deliver(&notification.channel, &user, &notification) {
                Ok(()) => {
                    diesel::update(notifications::table.find(notification.id))
                        .set((
                            notifications::status.eq(STATUS_SENT),
                            notifications::last_retry_at.eq(now),
                            notifications::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                    recovered += 1;
                }
                Err(err) => {
                    warn!(
                        notification_id = %notification.id,
                        retry_count = notification.retry_count + 1,
                        error = %err,
                        "notification retry failed"
                    );
                    diesel::update(notifications::table.find(notification.id))
                        .set((
                            notifications::retry_count.eq(notification.retry_count + 1),
                            notifications::last_retry_at.eq(now),
                            notifications::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                }
            }
        }
    }

    Ok(recovered)
}

pub fn mark_read(
    conn: &mut PgConnection,
    notification_id: Uuid,
    now: NaiveDateTime,
) -> EngineResult<Notification> {
    diesel::update(notifications::table.find(notification_id))
        .set((
            notifications::read_at.eq(now),
            notifications::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(notifications::table.find(notification_id).first(conn)?)
}

pub fn mark_all_read(
    conn: &mut PgConnection,
    user_id: Uuid,
    now: NaiveDateTime,
) -> EngineResult<usize> {
    let updated = diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user_id))
            .filter(notifications::read_at.is_null()),
    )
    .set((
        notifications::read_at.eq(now),
        notifications::updated_at.eq(now),
    ))
    .execute(conn)?;
    Ok(updated)
}

pub fn unread_count(conn: &mut PgConnection, user_id: Uuid) -> EngineResult<i64> {
    let count = notifications::table
        .filter(notifications::user_id.eq(user_id))
        .filter(notifications::read_at.is_null())
        .count()
        .get_result(conn)?;
    Ok(count)
}
