use std::env;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use once_cell::sync::Lazy;
use uuid::Uuid;

use collab_engine::db::{self, PgPool, PgPooledConnection};
use collab_engine::models::{CollaborationRequest, NewUser, Notification, User};
use collab_engine::notifications::DeliveryGateway;
use collab_engine::schema::{collaboration_requests, users};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serializes integration tests against the shared database.
pub fn acquire_db_lock() -> MutexGuard<'static, ()> {
    DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct TestDb {
    pub pool: PgPool,
}

// Each integration suite compiles its own copy of this module and uses a
// different subset of the helpers.
#[allow(dead_code)]
impl TestDb {
    /// Connects to `TEST_DATABASE_URL`, runs migrations, and starts from
    /// empty tables. Returns None (and the calling test passes trivially)
    /// when no test database is configured.
    pub fn new() -> Result<Option<Self>> {
        let database_url = match env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("TEST_DATABASE_URL not set; skipping integration test");
                return Ok(None);
            }
        };

        let pool = db::init_pool_with_size(&database_url, db::DEFAULT_MAX_POOL_SIZE)?;
        let mut conn = pool.get().context("failed to acquire connection")?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;

        Ok(Some(Self { pool }))
    }

    pub fn conn(&self) -> Result<PgPooledConnection> {
        self.pool.get().context("failed to get database connection")
    }

    pub fn insert_user(&self, name: &str) -> Result<User> {
        let mut conn = self.conn()?;
        let user = NewUser {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{name}@example.test"),
        };
        diesel::insert_into(users::table)
            .values(&user)
            .execute(&mut conn)
            .context("failed to insert user")?;
        Ok(users::table.find(user.id).first(&mut conn)?)
    }

    /// Forces a status directly, bypassing the lifecycle hooks. Used to
    /// arrange states the engine would otherwise reach through history.
    pub fn force_status(&self, collaboration_id: Uuid, status: &str) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::update(collaboration_requests::table.find(collaboration_id))
            .set(collaboration_requests::status.eq(status))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn reload_collaboration(&self, id: Uuid) -> Result<CollaborationRequest> {
        let mut conn = self.conn()?;
        Ok(collaboration_requests::table.find(id).first(&mut conn)?)
    }
}

fn truncate_all(conn: &mut diesel::PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE notifications, notification_preferences, reports, disputes, \
         reminders, collaboration_requests, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub channel: String,
    pub user_id: Uuid,
    pub kind: String,
}

/// Gateway that accepts everything and remembers what it delivered.
#[derive(Default)]
pub struct RecordingGateway {
    deliveries: Mutex<Vec<DeliveryRecord>>,
}

impl RecordingGateway {
    #[allow(dead_code)]
    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.deliveries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl DeliveryGateway for RecordingGateway {
    fn deliver(
        &self,
        channel: &str,
        user: &User,
        notification: &Notification,
    ) -> anyhow::Result<()> {
        let mut guard = self
            .deliveries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.push(DeliveryRecord {
            channel: channel.to_string(),
            user_id: user.id,
            kind: notification.kind.clone(),
        });
        Ok(())
    }
}

/// Gateway where every delivery attempt fails.
pub struct FailingGateway;

impl DeliveryGateway for FailingGateway {
    fn deliver(&self, _: &str, _: &User, _: &Notification) -> anyhow::Result<()> {
        Err(anyhow!("channel unavailable"))
    }
}

/// Current time truncated to microseconds, matching what a timestamptz
/// column stores; round-tripped values stay comparable with `==`.
#[allow(dead_code)]
pub fn now() -> NaiveDateTime {
    use chrono::Timelike;

    let now = chrono::Utc::now().naive_utc();
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}
