/// Messages pulled from the input topic, labelled by whether they held a record
pub const MESSAGES_RECEIVED: &str = "heart_rate_zones_messages_received_total";

/// Transactions resolved, labelled by outcome (committed, aborted)
pub const TRANSACTIONS: &str = "heart_rate_zones_transactions_total";

/// Zone events made visible by a committed transaction, labelled by zone
pub const ZONE_EVENTS_PUBLISHED: &str = "heart_rate_zones_events_published_total";

/// Time from pulling a message to resolving its transaction
pub const PROCESSING_DURATION: &str = "heart_rate_zones_processing_duration_seconds";

/// Broker errors while waiting for a message
pub const RECEIVE_ERRORS: &str = "heart_rate_zones_receive_errors_total";
