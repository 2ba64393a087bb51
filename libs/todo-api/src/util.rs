/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Fresh globally unique todo id (UUID v4, hyphenated).
pub fn new_todo_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
