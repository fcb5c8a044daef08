use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{is_unique_violation, EngineError, EngineResult};
use crate::models::{NewReport, Report};
use crate::notifications::{self, DeliveryGateway};
use crate::schema::{collaboration_requests, reports, users};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_UNDER_REVIEW: &str = "under_review";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_DISMISSED: &str = "dismissed";
pub const STATUS_RESOLVED: &str = "resolved";

pub const ALL_STATUSES: [&str; 5] = [
    STATUS_PENDING,
    STATUS_UNDER_REVIEW,
    STATUS_APPROVED,
    STATUS_DISMISSED,
    STATUS_RESOLVED,
];

pub const REASON_SPAM: &str = "spam";
pub const REASON_SCAM: &str = "scam";
pub const REASON_OFFENSIVE: &str = "offensive";
pub const REASON_FAKE_OPPORTUNITY: &str = "fake_opportunity";
pub const REASON_INAPPROPRIATE: &str = "inappropriate";
pub const REASON_HARASSMENT: &str = "harassment";
pub const REASON_OTHER: &str = "other";

pub const ALL_REASONS: [&str; 7] = [
    REASON_SPAM,
    REASON_SCAM,
    REASON_OFFENSIVE,
    REASON_FAKE_OPPORTUNITY,
    REASON_INAPPROPRIATE,
    REASON_HARASSMENT,
    REASON_OTHER,
];

pub const ACTION_NONE: &str = "none";
pub const ACTION_WARN: &str = "warn";
pub const ACTION_SUSPEND: &str = "suspend";
pub const ACTION_DELETE: &str = "delete";
pub const ACTION_HIDE: &str = "hide";

pub const ALL_ACTIONS: [&str; 5] = [
    ACTION_NONE,
    ACTION_WARN,
    ACTION_SUSPEND,
    ACTION_DELETE,
    ACTION_HIDE,
];

/// Tagged reference to the reported entity. Each variant resolves through its
/// own loader in `reportable_exists`, so adding a new reportable kind is one
/// variant plus one lookup arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportableRef {
    CollaborationRequest(Uuid),
    User(Uuid),
}

impl ReportableRef {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CollaborationRequest(_) => "collaboration_request",
            Self::User(_) => "user",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::CollaborationRequest(id) | Self::User(id) => *id,
        }
    }
}

pub fn can_transition_to(current: &str, target: &str) -> bool {
    let allowed: &[&str] = match current {
        STATUS_PENDING => &[STATUS_UNDER_REVIEW, STATUS_APPROVED, STATUS_DISMISSED],
        STATUS_UNDER_REVIEW => &[STATUS_APPROVED, STATUS_DISMISSED, STATUS_RESOLVED],
        STATUS_APPROVED => &[STATUS_RESOLVED],
        STATUS_DISMISSED => &[STATUS_RESOLVED],
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

pub fn can_be_reviewed(report: &Report) -> bool {
    report.status == STATUS_PENDING || report.status == STATUS_UNDER_REVIEW
}

pub fn is_self_report(reporter_id: Uuid, reportable: &ReportableRef) -> bool {
    matches!(reportable, ReportableRef::User(id) if *id == reporter_id)
}

fn reportable_exists(conn: &mut PgConnection, reportable: &ReportableRef) -> EngineResult<bool> {
    let count: i64 = match reportable {
        ReportableRef::CollaborationRequest(id) => collaboration_requests::table
            .filter(collaboration_requests::id.eq(id))
            .count()
            .get_result(conn)?,
        ReportableRef::User(id) => users::table
            .filter(users::id.eq(id))
            .count()
            .get_result(conn)?,
    };
    Ok(count > 0)
}

pub fn find_report(conn: &mut PgConnection, id: Uuid) -> EngineResult<Report> {
    reports::table
        .find(id)
        .first(conn)
        .optional()?
        .ok_or(EngineError::NotFound { entity: "report" })
}

/// Files a report against a piece of content. Self-reports are rejected
/// regardless of reason; a second report from the same user on the same
/// content hits the `(reporter_id, reportable_type, reportable_id)` unique
/// constraint and surfaces as a duplicate.
pub fn file_report(
    conn: &mut PgConnection,
    reporter_id: Uuid,
    reportable: ReportableRef,
    reason: &str,
    comment: Option<&str>,
) -> EngineResult<Report> {
    if !ALL_REASONS.contains(&reason) {
        return Err(EngineError::Validation(format!("unknown reason '{reason}'")));
    }
    if is_self_report(reporter_id, &reportable) {
        return Err(EngineError::Validation(
            "you cannot report yourself".to_string(),
        ));
    }
    if !reportable_exists(conn, &reportable)? {
        return Err(EngineError::NotFound {
            entity: "reported content",
        });
    }

    let new_report = NewReport {
        id: Uuid::new_v4(),
        reporter_id,
        reportable_type: reportable.type_name().to_string(),
        reportable_id: reportable.id(),
        reason: reason.to_string(),
        comment: comment.map(str::to_string),
        status: STATUS_PENDING.to_string(),
    };

    match diesel::insert_into(reports::table)
        .values(&new_report)
        .execute(conn)
    {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            return Err(EngineError::Duplicate(
                "you have already reported this content".to_string(),
            ));
        }
        Err(err) => return Err(err.into()),
    }

    Ok(reports::table.find(new_report.id).first(conn)?)
}

pub fn mark_under_review(
    conn: &mut PgConnection,
    report: &Report,
    now: NaiveDateTime,
) -> EngineResult<Report> {
    if !can_transition_to(&report.status, STATUS_UNDER_REVIEW) {
        return Err(EngineError::invalid_transition(
            "report",
            &report.status,
            allowed_transitions(&report.status),
        ));
    }

    diesel::update(reports::table.find(report.id))
        .set((
            reports::status.eq(STATUS_UNDER_REVIEW),
            reports::updated_at.eq(now),
        ))
        .execute(conn)?;

    Ok(reports::table.find(report.id).first(conn)?)
}

/// Result of an approve call. The review itself always committed when this is
/// returned; `side_effect_error` carries a failed admin action instead of
/// masking it or rolling the review back.
#[derive(Debug)]
pub struct ReviewOutcome {
    pub report: Report,
    pub side_effect_error: Option<String>,
}

/// Approves a report and applies the chosen admin action against the reported
/// entity after the review decision is recorded. The reporter is notified.
pub fn approve(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    report: &Report,
    admin_notes: Option<&str>,
    admin_action: Option<&str>,
    admin_id: Uuid,
    now: NaiveDateTime,
) -> EngineResult<ReviewOutcome> {
    if let Some(action) = admin_action {
        if !ALL_ACTIONS.contains(&action) {
            return Err(EngineError::Validation(format!(
                "unknown admin action '{action}'"
            )));
        }
    }
    if !can_transition_to(&report.status, STATUS_APPROVED) {
        return Err(EngineError::invalid_transition(
            "report",
            &report.status,
            allowed_transitions(&report.status),
        ));
    }

    diesel::update(reports::table.find(report.id))
        .set((
            reports::status.eq(STATUS_APPROVED),
            reports::admin_notes.eq(admin_notes),
            reports::admin_action.eq(admin_action),
            reports::reviewed_by.eq(admin_id),
            reports::reviewed_at.eq(now),
            reports::updated_at.eq(now),
        ))
        .execute(conn)?;

    let report: Report = reports::table.find(report.id).first(conn)?;

    let mut side_effect_error = None;
    if let Some(action) = admin_action.filter(|action| *action != ACTION_NONE) {
        if let Err(err) = apply_admin_action(conn, gateway, &report, action, now) {
            error!(
                report_id = %report.id,
                action,
                error = %err,
                "admin action failed after review commit"
            );
            side_effect_error = Some(err.to_string());
        }
    }

    notify_reporter(conn, gateway, &report, "approve", admin_notes, now);

    Ok(ReviewOutcome {
        report,
        side_effect_error,
    })
}

pub fn dismiss(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    report: &Report,
    admin_notes: Option<&str>,
    admin_id: Uuid,
    now: NaiveDateTime,
) -> EngineResult<Report> {
    if !can_transition_to(&report.status, STATUS_DISMISSED) {
        return Err(EngineError::invalid_transition(
            "report",
            &report.status,
            allowed_transitions(&report.status),
        ));
    }

    diesel::update(reports::table.find(report.id))
        .set((
            reports::status.eq(STATUS_DISMISSED),
            reports::admin_notes.eq(admin_notes),
            reports::reviewed_by.eq(admin_id),
            reports::reviewed_at.eq(now),
            reports::updated_at.eq(now),
        ))
        .execute(conn)?;

    let report: Report = reports::table.find(report.id).first(conn)?;
    notify_reporter(conn, gateway, &report, "dismiss", admin_notes, now);
    Ok(report)
}

/// Archives a reviewed report.
pub fn resolve_report(
    conn: &mut PgConnection,
    report: &Report,
    admin_id: Uuid,
    now: NaiveDateTime,
) -> EngineResult<Report> {
    if !can_transition_to(&report.status, STATUS_RESOLVED) {
        return Err(EngineError::invalid_transition(
            "report",
            &report.status,
            allowed_transitions(&report.status),
        ));
    }

    diesel::update(reports::table.find(report.id))
        .set((
            reports::status.eq(STATUS_RESOLVED),
            reports::reviewed_by.eq(admin_id),
            reports::reviewed_at.eq(now),
            reports::updated_at.eq(now),
        ))
        .execute(conn)?;

    Ok(reports::table.find(report.id).first(conn)?)
}

fn apply_admin_action(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    report: &Report,
    action: &str,
    now: NaiveDateTime,
) -> anyhow::Result<()> {
    let target_id = report.reportable_id;

    match (action, report.reportable_type.as_str()) {
        (ACTION_WARN, "user") => {
            notifications::send(
                conn,
                gateway,
                target_id,
                "admin_warning",
                json!({
                    "reason": report.reason,
                    "admin_notes": report.admin_notes,
                }),
                false,
                now,
            )?;
        }
        (ACTION_SUSPEND, "user") => {
            diesel::update(users::table.find(target_id))
                .set((users::is_suspended.eq(true), users::updated_at.eq(now)))
                .execute(conn)?;
            info!(user_id = %target_id, report_id = %report.id, "suspended reported user");
            notifications::send(
                conn,
                gateway,
                target_id,
                "account_suspended",
                json!({
                    "reason": report.reason,
                    "admin_notes": report.admin_notes,
                }),
                false,
                now,
            )?;
        }
        (ACTION_DELETE, "collaboration_request") => {
            diesel::delete(collaboration_requests::table.find(target_id)).execute(conn)?;
            info!(collaboration_id = %target_id, report_id = %report.id, "deleted reported collaboration");
        }
        (ACTION_HIDE, "collaboration_request") => {
            diesel::update(collaboration_requests::table.find(target_id))
                .set((
                    collaboration_requests::is_hidden.eq(true),
                    collaboration_requests::updated_at.eq(now),
                ))
                .execute(conn)?;
            info!(collaboration_id = %target_id, report_id = %report.id, "hid reported collaboration");
        }
        (action, reportable_type) => {
            anyhow::bail!("action '{action}' is not applicable to '{reportable_type}'");
        }
    }

    Ok(())
}

fn notify_reporter(
    conn: &mut PgConnection,
    gateway: &dyn DeliveryGateway,
    report: &Report,
    decision: &str,
    admin_notes: Option<&str>,
    now: NaiveDateTime,
) {
    let payload = json!({
        "report_id": report.id,
        "action": decision,
        "admin_notes": admin_notes,
    });
    if let Err(err) = notifications::send(
        conn,
        gateway,
        report.reporter_id,
        "report_reviewed",
        payload,
        false,
        now,
    ) {
        warn!(
            report_id = %report.id,
            error = %err,
            "failed to queue report review notification"
        );
    }
}

#[derive(Debug, Default)]
pub struct ReportStats {
    pub total: i64,
    pub pending: i64,
    pub under_review: i64,
    pub resolved: i64,
    pub by_reason: Vec<(String, i64)>,
    pub by_type: Vec<(String, i64)>,
}

/// Counts surfaced on the moderation dashboard. "Resolved" lumps every
/// report that has left the review queue, matching the moderation view.
pub fn moderation_stats(conn: &mut PgConnection) -> EngineResult<ReportStats> {
    use diesel::dsl::count_star;

    let total = reports::table.count().get_result(conn)?;
    let pending = reports::table
        .filter(reports::status.eq(STATUS_PENDING))
        .count()
        .get_result(conn)?;
    let under_review = reports::table
        .filter(reports::status.eq(STATUS_UNDER_REVIEW))
        .count()
        .get_result(conn)?;
    let resolved = reports::table
        .filter(reports::status.eq_any([STATUS_APPROVED, STATUS_DISMISSED, STATUS_RESOLVED]))
        .count()
        .get_result(conn)?;
    let by_reason = reports::table
        .group_by(reports::reason)
        .select((reports::reason, count_star()))
        .load(conn)?;
    let by_type = reports::table
        .group_by(reports::reportable_type)
        .select((reports::reportable_type, count_star()))
        .load(conn)?;

    Ok(ReportStats {
        total,
        pending,
        under_review,
        resolved,
        by_reason,
        by_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn report_with_status(status: &str) -> Report {
        let now = Utc::now().naive_utc();
        Report {
            id: Uuid::new_v4(),
            reporter_id: Uuid::new_v4(),
            reportable_type: "user".to_string(),
            reportable_id: Uuid::new_v4(),
            reason: REASON_SPAM.to_string(),
            comment: None,
            status: status.to_string(),
            admin_notes: None,
            admin_action: None,
            reviewed_by: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn transition_table_is_exhaustive() {
        let permitted = [
            (STATUS_PENDING, STATUS_UNDER_REVIEW),
            (STATUS_PENDING, STATUS_APPROVED),
            (STATUS_PENDING, STATUS_DISMISSED),
            (STATUS_UNDER_REVIEW, STATUS_APPROVED),
            (STATUS_UNDER_REVIEW, STATUS_DISMISSED),
            (STATUS_UNDER_REVIEW, STATUS_RESOLVED),
            (STATUS_APPROVED, STATUS_RESOLVED),
            (STATUS_DISMISSED, STATUS_RESOLVED),
        ];

        for current in ALL_STATUSES {
            for target in ALL_STATUSES {
                assert_eq!(
                    can_transition_to(current, target),
                    permitted.contains(&(current, target)),
                    "{current} -> {target}"
                );
            }
        }
    }

    #[test]
    fn reviewable_only_before_a_decision() {
        assert!(can_be_reviewed(&report_with_status(STATUS_PENDING)));
        assert!(can_be_reviewed(&report_with_status(STATUS_UNDER_REVIEW)));
        assert!(!can_be_reviewed(&report_with_status(STATUS_APPROVED)));
        assert!(!can_be_reviewed(&report_with_status(STATUS_DISMISSED)));
        assert!(!can_be_reviewed(&report_with_status(STATUS_RESOLVED)));
    }

    #[test]
    fn self_report_detection_only_applies_to_user_targets() {
        let reporter = Uuid::new_v4();
        assert!(is_self_report(reporter, &ReportableRef::User(reporter)));
        assert!(!is_self_report(reporter, &ReportableRef::User(Uuid::new_v4())));
        assert!(!is_self_report(
            reporter,
            &ReportableRef::CollaborationRequest(reporter)
        ));
    }

    #[test]
    fn reportable_ref_exposes_type_and_id() {
        let id = Uuid::new_v4();
        let reference = ReportableRef::CollaborationRequest(id);
        assert_eq!(reference.type_name(), "collaboration_request");
        assert_eq!(reference.id(), id);
    }
}
