use crate::error::StoreError;
use crate::models::{NotificationPreference, StoredAttendance, User};
use crate::schema;
use async_trait::async_trait;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::result::QueryResult;

/// The SQL that creates the `users` and `attendance` tables if they do not exist yet.
const CREATE_TABLES: &str = include_str!("../migrations/2024-10-01-000000_create_tables/up.sql");

/// What the sync pipeline needs from storage.
///
/// Every pipeline only reads and writes its own user's rows, so implementations do not need
/// any cross-user locking. [`AttendanceStore::upsert_attendance`] must be atomic per
/// `(user_id, subject_code)`.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn get_attendance(
        &self,
        user_id: &str,
        subject_code: &str,
    ) -> Result<Option<StoredAttendance>, StoreError>;

    async fn upsert_attendance(&self, row: &StoredAttendance) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy)]
struct EnableForeignKeys;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for EnableForeignKeys {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// The manager for storing users and their last known attendance.
#[derive(Clone)]
pub struct AttendanceManager {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl AttendanceManager {
    /// Creates a new `AttendanceManager` backed by the `sqlite3` database at `database_url`.
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        // Every connection to `:memory:` is its own database, so keep exactly one around.
        let builder = if database_url == ":memory:" {
            Pool::builder()
                .max_size(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            Pool::builder().max_size(8)
        };

        let pool = builder
            .connection_customizer(Box::new(EnableForeignKeys))
            .build(ConnectionManager::<SqliteConnection>::new(database_url))?;

        Ok(Self { pool })
    }

    /// Opens a private in-memory database with the tables already created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let manager = Self::connect(":memory:")?;
        manager.init_schema()?;
        Ok(manager)
    }

    fn conn(
        &self,
    ) -> Result<diesel::r2d2::PooledConnection<ConnectionManager<SqliteConnection>>, StoreError>
    {
        Ok(self.pool.get()?)
    }

    /// Creates the tables if they are missing.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn()?.batch_execute(CREATE_TABLES)?;
        Ok(())
    }

    /// Retrieves all users.
    pub fn users(&self) -> Result<Vec<User>, StoreError> {
        use schema::users::dsl::*;

        Ok(users
            .select(User::as_select())
            .order(username.asc())
            .load(&mut self.conn()?)?)
    }

    /// Retrieves a user by their portal username, if there is one.
    pub fn get_user_by_username(&self, portal_username: &str) -> Result<Option<User>, StoreError> {
        use schema::users::dsl::*;

        Ok(users
            .filter(username.eq(portal_username))
            .select(User::as_select())
            .first(&mut self.conn()?)
            .optional()?)
    }

    /// Retrieves a user by ID.
    pub fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        use schema::users::dsl::*;

        Ok(users
            .find(user_id)
            .select(User::as_select())
            .first(&mut self.conn()?)
            .optional()?)
    }

    /// Inserts users into the database, all or nothing.
    pub fn insert_users(&self, new_users: &[User]) -> Result<usize, StoreError> {
        if new_users.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;

        let inserted = conn.transaction(|conn| -> QueryResult<usize> {
            diesel::insert_into(schema::users::table)
                .values(new_users)
                .execute(conn)
        })?;

        Ok(inserted)
    }

    /// Removes and returns a user given their portal username. Their attendance rows go with them.
    pub fn delete_user(&self, portal_username: &str) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn()?;
        let deleted = conn.transaction(|conn| delete_user_in(conn, portal_username))?;

        Ok(deleted)
    }

    /// Removes the users named in `remove` and inserts `add`, all in one transaction. If anything
    /// fails, the stored users are left untouched.
    pub fn reconcile_users(&self, remove: &[String], add: &[User]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;

        conn.transaction(|conn| -> QueryResult<()> {
            for portal_username in remove {
                delete_user_in(conn, portal_username)?;
            }
            if !add.is_empty() {
                diesel::insert_into(schema::users::table)
                    .values(add)
                    .execute(conn)?;
            }
            Ok(())
        })?;

        Ok(())
    }

    /// Changes which attendance changes a user is emailed about. Returns whether the user exists.
    pub fn set_preference(
        &self,
        portal_username: &str,
        preference: NotificationPreference,
    ) -> Result<bool, StoreError> {
        use schema::users::dsl::*;

        let updated = diesel::update(users.filter(username.eq(portal_username)))
            .set(notification_level.eq(preference.as_str()))
            .execute(&mut self.conn()?)?;

        Ok(updated == 1)
    }

    /// Retrieves every stored subject for a user.
    pub fn user_attendance(&self, for_user: &str) -> Result<Vec<StoredAttendance>, StoreError> {
        use schema::attendance::dsl::*;

        Ok(attendance
            .filter(user_id.eq(for_user))
            .select(StoredAttendance::as_select())
            .order(subject_code.asc())
            .load(&mut self.conn()?)?)
    }

    /// Retrieves the stored attendance of one subject for a user.
    pub fn get_attendance_row(
        &self,
        for_user: &str,
        code: &str,
    ) -> Result<Option<StoredAttendance>, StoreError> {
        use schema::attendance::dsl::*;

        Ok(attendance
            .find((for_user, code))
            .select(StoredAttendance::as_select())
            .first(&mut self.conn()?)
            .optional()?)
    }

    /// Stores a subject row. If the row already exists it is replaced in place.
    pub fn upsert_attendance_row(&self, row: &StoredAttendance) -> Result<(), StoreError> {
        diesel::replace_into(schema::attendance::table)
            .values(row)
            .execute(&mut self.conn()?)?;

        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T, StoreError> + Send + 'static,
    {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || f(&manager)).await?
    }
}

fn delete_user_in(conn: &mut SqliteConnection, portal_username: &str) -> QueryResult<Option<User>> {
    use schema::users::dsl::*;

    let Some(user) = users
        .filter(username.eq(portal_username))
        .select(User::as_select())
        .first(conn)
        .optional()?
    else {
        return Ok(None);
    };

    diesel::delete(schema::attendance::table)
        .filter(schema::attendance::user_id.eq(&user.id))
        .execute(conn)?;
    diesel::delete(users.find(&user.id)).execute(conn)?;

    Ok(Some(user))
}

#[async_trait]
impl AttendanceStore for AttendanceManager {
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.blocking(|manager| manager.users()).await
    }

    async fn get_attendance(
        &self,
        user_id: &str,
        subject_code: &str,
    ) -> Result<Option<StoredAttendance>, StoreError> {
        let (user_id, subject_code) = (user_id.to_string(), subject_code.to_string());
        self.blocking(move |manager| manager.get_attendance_row(&user_id, &subject_code))
            .await
    }

    async fn upsert_attendance(&self, row: &StoredAttendance) -> Result<(), StoreError> {
        let row = row.clone();
        self.blocking(move |manager| manager.upsert_attendance_row(&row))
            .await
    }
}
