/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifies one logical dispatch (N rows created from one originating event).
///
/// UUID v7 so ids sort by creation time.
pub type DispatchId = uuid::Uuid;

/// Generate a fresh, time-ordered dispatch id.
pub fn new_dispatch_id() -> DispatchId {
    uuid::Uuid::now_v7()
}
