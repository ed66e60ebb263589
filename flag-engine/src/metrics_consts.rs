pub const FLAG_RESOLUTION_COUNTER: &str = "flags_resolution_total";
pub const FLAG_STORE_ERRORS_COUNTER: &str = "flags_store_errors_total";
pub const RESULT_CACHE_HIT_COUNTER: &str = "flags_result_cache_hit_total";
pub const DEFINITIONS_CACHE_HIT_COUNTER: &str = "flags_definitions_cache_hit_total";
pub const TRANSPORT_SNAPSHOT_REJECTED_COUNTER: &str = "flags_transport_snapshot_rejected_total";
pub const FLAG_CACHE_INVALIDATION_COUNTER: &str = "flags_cache_invalidations_total";
