// ── Organizations ────────────────────────────────────────────────

pub const MIN_ORG_NAME_LEN: usize = 2;
pub const MAX_ORG_NAME_LEN: usize = 100;
pub const MIN_SLUG_LEN: usize = 2;
pub const MAX_SLUG_LEN: usize = 50;

/// Slugs that collide with fixed route segments.
pub const RESERVED_SLUGS: &[&str] = &["admin", "health"];

// ── Booking ──────────────────────────────────────────────────────

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_SERVICE_DESCRIPTION_LEN: usize = 1000;
pub const MIN_DURATION_MINUTES: u32 = 5;
pub const MAX_DURATION_MINUTES: u32 = 480;
pub const MAX_PRICE_FRACTION_DIGITS: usize = 2;
pub const MAX_PHONE_LEN: usize = 20;
pub const MAX_NOTES_LEN: usize = 500;
pub const MAX_SCHEDULE_SLOTS: usize = 64;

// ── Collections ──────────────────────────────────────────────────

pub const MAX_COLLECTION_DESCRIPTION_LEN: usize = 500;
pub const MAX_ICON_LEN: usize = 10;
pub const MAX_FIELD_NAME_LEN: usize = 100;
pub const MAX_FIELDS_PER_COLLECTION: usize = 200;

/// Records per WAL event during bulk import.
pub const IMPORT_BATCH_SIZE: usize = 100;

// ── Storage ──────────────────────────────────────────────────────

/// Schema version written at the head of every new log.
pub const SCHEMA_VERSION: u32 = 1;

/// Upper bound on a single encoded WAL entry; anything larger is treated as corruption.
pub const MAX_WAL_ENTRY_BYTES: usize = 64 * 1024 * 1024;

pub const MAX_POOLED_DATABASES: usize = 4096;
