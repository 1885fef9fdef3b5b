use redb::TableDefinition;

/// Organisations: uuid -> Organisation (msgpack)
pub const ORGANISATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("organisations");

/// Organisation name index: name -> uuid (enforces global name uniqueness)
pub const ORGANISATION_NAMES: TableDefinition<&str, &str> =
    TableDefinition::new("organisation_names");

/// Users: uuid -> User (msgpack)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Email index: normalized email -> user uuid
pub const USER_EMAILS: TableDefinition<&str, &str> = TableDefinition::new("user_emails");

/// Pending one-time login tokens: token -> user uuid
pub const USER_RECOVERY_TOKENS: TableDefinition<&str, &str> =
    TableDefinition::new("user_recovery_tokens");

/// Sessions: bearer token -> Session (msgpack)
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// File and folder records: "{organisation uuid}/{file uuid}" -> FileRecord (msgpack).
/// A tenant's rows form one contiguous key range.
pub const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");

/// Parent index: "{organisation uuid}/{parent uuid}/{file uuid}" -> file uuid
pub const FILE_CHILDREN: TableDefinition<&str, &str> = TableDefinition::new("file_children");

/// Uploads awaiting their blob: "{organisation uuid}/{file uuid}" -> created_at (unix millis)
pub const PENDING_UPLOADS: TableDefinition<&str, i64> = TableDefinition::new("pending_uploads");
