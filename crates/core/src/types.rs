/// Jobs are identified by a server-generated UUID (v4).
pub type JobId = uuid::Uuid;

/// User ids are opaque strings issued by the account collaborator.
pub type UserId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
