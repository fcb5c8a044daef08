use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_suspended: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = collaboration_requests)]
#[diesel(belongs_to(User, foreign_key = user_id))]
pub struct CollaborationRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: String,
    pub deadline: Option<NaiveDateTime>,
    pub share_token: String,
    pub is_hidden: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = collaboration_requests)]
pub struct NewCollaborationRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: String,
    pub deadline: Option<NaiveDateTime>,
    pub share_token: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = reminders)]
#[diesel(belongs_to(CollaborationRequest, foreign_key = collaboration_request_id))]
#[diesel(belongs_to(User, foreign_key = user_id))]
pub struct Reminder {
    pub id: Uuid,
    pub collaboration_request_id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub status: String,
    pub scheduled_at: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = reminders)]
pub struct NewReminder {
    pub id: Uuid,
    pub collaboration_request_id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub status: String,
    pub scheduled_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = disputes)]
#[diesel(belongs_to(CollaborationRequest, foreign_key = collaboration_request_id))]
pub struct Dispute {
    pub id: Uuid,
    pub collaboration_request_id: Uuid,
    pub initiator_id: Uuid,
    pub respondent_id: Uuid,
    pub status: String,
    pub kind: String,
    pub description: String,
    pub evidence: serde_json::Value,
    pub resolution: Option<String>,
    pub admin_notes: Option<String>,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<NaiveDateTime>,
    pub auto_opened_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = disputes)]
pub struct NewDispute {
    pub id: Uuid,
    pub collaboration_request_id: Uuid,
    pub initiator_id: Uuid,
    pub respondent_id: Uuid,
    pub status: String,
    pub kind: String,
    pub description: String,
    pub evidence: serde_json::Value,
    pub auto_opened_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = reports)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub reportable_type: String,
    pub reportable_id: Uuid,
    pub reason: String,
    pub comment: Option<String>,
    pub status: String,
    pub admin_notes: Option<String>,
    pub admin_action: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = reports)]
pub struct NewReport {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub reportable_type: String,
    pub reportable_id: Uuid,
    pub reason: String,
    pub comment: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = notification_preferences)]
#[diesel(primary_key(user_id))]
pub struct NotificationPreference {
    pub user_id: Uuid,
    pub in_app_enabled: bool,
    pub email_enabled: bool,
    pub dispute_events: bool,
    pub report_events: bool,
    pub reminder_events: bool,
    pub admin_events: bool,
    pub application_status: bool,
    pub request_status: bool,
    pub new_message: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notification_preferences)]
pub struct NewNotificationPreference {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = notifications)]
#[diesel(belongs_to(User, foreign_key = user_id))]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub channel: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub retry_count: i32,
    pub last_retry_at: Option<NaiveDateTime>,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub channel: String,
    pub payload: serde_json::Value,
    pub status: String,
}
