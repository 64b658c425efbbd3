/// Days of past and future events requested on each fetch.
pub const DEFAULT_SYNC_DAYS: i64 = 365;

/// Tokens are refreshed this long before they actually expire.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;

/// Upper bound for any network-bound auth operation.
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 30;

/// Upper bound for fetching one account's events during aggregation.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

/// Lifetime assumed when a token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
