use log::{Level as LogLevel, Log, Metadata, Record, SetLoggerError};

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub time_format: String,
    /// Records from modules whose path contains any of these are dropped.
    pub mod_filter: Vec<&'static str>,
    /// Records whose message contains any of these are dropped.
    pub body_filter: Vec<&'static str>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            time_format: "%Y-%m-%d %H:%M:%S%z".to_string(),
            mod_filter: Vec::new(),
            body_filter: Vec::new(),
        }
    }
}

impl LoggingConfig {
    pub fn is_filtered(&self, module: Option<&str>, body: &str) -> bool {
        let mod_skip = module
            .map(|m| self.mod_filter.iter().any(|f| m.contains(*f)))
            .unwrap_or(false);
        mod_skip || self.body_filter.iter().any(|f| body.contains(*f))
    }
}

/// Line-per-record stdout logger.
#[derive(Clone, Debug)]
pub struct Logger {
    config: LoggingConfig,
}

impl Logger {
    pub fn new(config: LoggingConfig) -> Self {
        Logger { config }
    }

    pub fn format(&self, record: &Record) -> Option<String> {
        let body = format!("{}", record.args());
        if record.level() > self.config.level || self.config.is_filtered(record.module_path(), &body) {
            return None;
        }
        Some(format!(
            "{time} {level} [{module}] {body}",
            time = chrono::Local::now().format(self.config.time_format.as_ref()),
            level = record.level(),
            module = record.module_path().unwrap_or("-"),
            body = body
        ))
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.config.level
    }

    fn log(&self, record: &Record) {
        if let Some(line) = self.format(record) {
            println!("{}", line);
        }
    }

    fn flush(&self) {}
}

/// Installs a [`Logger`] as the process-wide `log` backend.
pub fn init(config: LoggingConfig) -> Result<(), SetLoggerError> {
    let level = config.level.to_level_filter();
    log::set_boxed_logger(Box::new(Logger::new(config)))?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoggingConfig {
        LoggingConfig {
            level: LogLevel::Debug,
            mod_filter: vec!["attohttpc", "rustls"],
            body_filter: vec!["heartbeat"],
            ..LoggingConfig::default()
        }
    }

    #[test]
    fn filters_by_module_substring() {
        let lc = config();
        assert!(lc.is_filtered(Some("attohttpc::happy"), "connecting"));
        assert!(lc.is_filtered(Some("my_rustls_wrapper"), "connecting"));
        assert!(!lc.is_filtered(Some("zipkin_trace_view::skew"), "correcting"));
        assert!(!lc.is_filtered(None, "connecting"));
    }

    #[test]
    fn filters_by_body() {
        assert!(config().is_filtered(None, "sent heartbeat 3"));
    }

    #[test]
    fn formats_enabled_records() {
        let logger = Logger::new(config());
        let line = logger.format(
            &Record::builder()
                .args(format_args!("merged {} fragments", 2))
                .level(LogLevel::Debug)
                .module_path(Some("zipkin_trace_view::normalize"))
                .build(),
        );
        let line = line.unwrap();
        assert!(line.ends_with("DEBUG [zipkin_trace_view::normalize] merged 2 fragments"));

        let trace = logger.format(
            &Record::builder()
                .args(format_args!("too chatty"))
                .level(LogLevel::Trace)
                .build(),
        );
        assert_eq!(trace, None);
    }
}
