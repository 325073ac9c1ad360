use log::Level;

/// Formats lifecycle events as `message, key=value, ...` on the `log` facade.
pub struct StructuredLogger {
    enabled: bool,
}

impl StructuredLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn log_event(&self, level: Level, event: &str, metadata: &[(&str, String)]) {
        if !self.enabled {
            return;
        }
        log::log!(level, "{}", format_event(event, metadata));
    }

    pub fn log_driver(&self, level: Level, action: &str, driver_id: i64, implementation_id: &str) {
        self.log_event(
            level,
            &format!("Driver {}", action),
            &[
                ("driver_id", driver_id.to_string()),
                ("implementation_id", implementation_id.to_string()),
            ],
        );
    }

    pub fn log_pool(&self, level: Level, action: &str, data_source_id: i64, driver_id: i64) {
        self.log_event(
            level,
            &format!("Pool {}", action),
            &[
                ("data_source_id", data_source_id.to_string()),
                ("driver_id", driver_id.to_string()),
            ],
        );
    }

    pub fn log_error(&self, error: &str, metadata: &[(&str, String)]) {
        self.log_event(Level::Error, &format!("Error: {}", error), metadata);
    }
}

fn format_event(event: &str, metadata: &[(&str, String)]) -> String {
    let mut message = event.to_string();
    for (key, value) in metadata {
        message.push_str(&format!(", {}={}", key, value));
    }
    message
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new(true)
    }
}
