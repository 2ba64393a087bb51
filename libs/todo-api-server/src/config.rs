use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Mount point of the todo routes.
    #[serde(default = "default_todos_path")]
    pub todos_path: String,
    /// Add a `detail` field with the full error chain to error bodies.
    #[serde(default)]
    pub debug_errors_response: bool,
    /// Requests whose URI contains any of these are not access-logged.
    #[serde(default)]
    pub ignore_log_urls: Vec<String>,
    /// Deadline for a whole request, body read and publish included.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_port() -> u16 {
    5007
}
fn default_todos_path() -> String {
    "/todos".into()
}
fn default_read_timeout_ms() -> u64 {
    15_000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            todos_path: default_todos_path(),
            debug_errors_response: false,
            ignore_log_urls: Vec::new(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl HttpConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// `todos_path` with exactly one leading slash and no trailing slash.
    pub fn base_path(&self) -> String {
        let trimmed = self.todos_path.trim_matches('/');
        format!("/{trimmed}")
    }

    pub fn is_log_ignored(&self, uri: &str) -> bool {
        self.ignore_log_urls.iter().any(|s| !s.is_empty() && uri.contains(s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_is_normalised() {
        for raw in ["todos", "/todos", "/todos/", "todos/"] {
            let cfg = HttpConfig { todos_path: raw.into(), ..HttpConfig::default() };
            assert_eq!(cfg.base_path(), "/todos");
        }
        let cfg = HttpConfig { todos_path: "/api/v1/todos".into(), ..HttpConfig::default() };
        assert_eq!(cfg.base_path(), "/api/v1/todos");
    }

    #[test]
    fn ignore_list_matches_substrings() {
        let cfg = HttpConfig {
            ignore_log_urls: vec!["health".into(), String::new()],
            ..HttpConfig::default()
        };
        assert!(cfg.is_log_ignored("/todos/health"));
        assert!(!cfg.is_log_ignored("/todos/a1"));
    }
}
