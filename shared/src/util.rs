/// Current UTC timestamp in milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Current UTC timestamp in whole seconds
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current UTC time as an RFC 3339 string
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
