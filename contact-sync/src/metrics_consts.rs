pub const CONTACTS_READ: &str = "contact_sync_contacts_read_total";
pub const CONTACTS_SKIPPED: &str = "contact_sync_contacts_skipped_total";
pub const CONTACTS_ROUTED: &str = "contact_sync_contacts_routed_total";
pub const CONTACTS_DROPPED: &str = "contact_sync_contacts_dropped_total";
pub const LOOKUP_TIME: &str = "contact_sync_lookup_duration_seconds";
pub const LOOKUP_WAIT_TIME: &str = "contact_sync_lookup_wait_seconds";
pub const LOOKUP_ERRORS: &str = "contact_sync_lookup_errors_total";
pub const BATCH_FLUSHES: &str = "contact_sync_batch_flushes_total";
pub const BATCH_FLUSH_FAILURES: &str = "contact_sync_batch_flush_failures_total";
pub const BATCH_FLUSH_TIME: &str = "contact_sync_batch_flush_duration_seconds";
pub const BATCH_SIZE: &str = "contact_sync_batch_size";
