diesel::table! {
    collaboration_requests (id) {
        id -> Uuid,
        user_id -> Uuid,
        #[max_length = 255]
        title -> Varchar,
        description -> Text,
        #[max_length = 32]
        status -> Varchar,
        deadline -> Nullable<Timestamptz>,
        #[max_length = 32]
        share_token -> Varchar,
        is_hidden -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    disputes (id) {
        id -> Uuid,
        collaboration_request_id -> Uuid,
        initiator_id -> Uuid,
        respondent_id -> Uuid,
        #[max_length = 32]
        status -> Varchar,
        #[max_length = 32]
        kind -> Varchar,
        description -> Text,
        evidence -> Jsonb,
        #[max_length = 32]
        resolution -> Nullable<Varchar>,
        admin_notes -> Nullable<Text>,
        resolution_notes -> Nullable<Text>,
        resolved_by -> Nullable<Uuid>,
        resolved_at -> Nullable<Timestamptz>,
        auto_opened_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    notification_preferences (user_id) {
        user_id -> Uuid,
        in_app_enabled -> Bool,
        email_enabled -> Bool,
        dispute_events -> Bool,
        report_events -> Bool,
        reminder_events -> Bool,
        admin_events -> Bool,
        application_status -> Bool,
        request_status -> Bool,
        new_message -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    notifications (id) {
        id -> Uuid,
        user_id -> Uuid,
        #[max_length = 64]
        kind -> Varchar,
        #[max_length = 16]
        channel -> Varchar,
        payload -> Jsonb,
        #[max_length = 16]
        status -> Varchar,
        retry_count -> Int4,
        last_retry_at -> Nullable<Timestamptz>,
        read_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    reminders (id) {
        id -> Uuid,
        collaboration_request_id -> Uuid,
        user_id -> Uuid,
        #[max_length = 32]
        kind -> Varchar,
        #[max_length = 16]
        status -> Varchar,
        scheduled_at -> Timestamptz,
        sent_at -> Nullable<Timestamptz>,
        cancelled_at -> Nullable<Timestamptz>,
        message -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    reports (id) {
        id -> Uuid,
        reporter_id -> Uuid,
        #[max_length = 32]
        reportable_type -> Varchar,
        reportable_id -> Uuid,
        #[max_length = 32]
        reason -> Varchar,
        comment -> Nullable<Text>,
        #[max_length = 32]
        status -> Varchar,
        admin_notes -> Nullable<Text>,
        #[max_length = 16]
        admin_action -> Nullable<Varchar>,
        reviewed_by -> Nullable<Uuid>,
        reviewed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        #[max_length = 100]
        name -> Varchar,
        #[max_length = 255]
        email -> Varchar,
        is_suspended -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(collaboration_requests -> users (user_id));
diesel::joinable!(disputes -> collaboration_requests (collaboration_request_id));
diesel::joinable!(notification_preferences -> users (user_id));
diesel::joinable!(notifications -> users (user_id));
diesel::joinable!(reminders -> collaboration_requests (collaboration_request_id));
diesel::joinable!(reminders -> users (user_id));
diesel::joinable!(reports -> users (reporter_id));

diesel::allow_tables_to_appear_in_same_query!(
    collaboration_requests,
    disputes,
    notification_preferences,
    notifications,
    reminders,
    reports,
    users,
);
