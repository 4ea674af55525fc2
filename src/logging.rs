//! Log subscriber setup
//!
//! Every event emitted by this crate uses the `bean_context` target, so
//! lifecycle phases, scans, bean creation and proxy dispatch can be filtered
//! independently of the host application.
//!
//! # Features
//!
//! - `logging` - emit events (default)
//! - `logging-json` - install a JSON subscriber
//! - `logging-pretty` - install a human-readable subscriber
//!
//! # Example
//!
//! ```rust,ignore
//! use bean_context::logging;
//!
//! // JSON if `logging-json` is enabled, pretty otherwise
//! logging::init();
//!
//! // Only this crate's events, at TRACE
//! logging::builder()
//!     .trace()
//!     .context_only()
//!     .compact()
//!     .init();
//! ```

#[cfg(feature = "logging")]
use tracing::Level;

/// Target of every event emitted by this crate
pub const TARGET: &str = "bean_context";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event
    #[default]
    Json,
    /// Multi-line, colored
    Pretty,
    /// Single line per event
    Compact,
}

/// Subscriber configuration.
#[cfg(feature = "logging")]
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    with_file: bool,
    with_line_number: bool,
    with_thread_names: bool,
}

#[cfg(feature = "logging")]
impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            with_file: false,
            with_line_number: false,
            with_thread_names: false,
        }
    }
}

#[cfg(feature = "logging")]
impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Include per-dependency resolution steps
    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    /// Phases, scans and bean creation
    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    /// Skipped modules and failures only
    pub fn warn(self) -> Self {
        self.with_level(Level::WARN)
    }

    /// Restrict output to one target
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Restrict output to this crate's events
    pub fn context_only(self) -> Self {
        self.with_target_filter(TARGET)
    }

    /// Include the source file
    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    /// Include the source line
    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    /// Include the emitting thread's name
    pub fn with_thread_names(mut self) -> Self {
        self.with_thread_names = true;
        self
    }

    /// One JSON object per event
    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Multi-line, colored output
    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    /// One line per event
    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    #[cfg_attr(not(any(feature = "logging-json", feature = "logging-pretty")), allow(dead_code))]
    fn directive(&self) -> String {
        match self.target {
            Some(target) => format!("{}={}", target, self.level),
            None => self.level.to_string(),
        }
    }

    /// Install the global subscriber.
    ///
    /// Does nothing if a subscriber is already installed. Without
    /// `logging-json`, `Json` falls back to the default text format.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) {
        use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

        let base = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_names(self.with_thread_names)
            .with_target(true);

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => base.json().boxed(),
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => base.boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Compact => base.compact().boxed(),
        };

        let _ = tracing_subscriber::registry()
            .with(layer)
            .with(EnvFilter::new(self.directive()))
            .try_init();
    }

    /// No subscriber crate is enabled
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) {}
}

#[cfg(feature = "logging")]
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Install the default subscriber: JSON with `logging-json`, pretty otherwise
#[cfg(feature = "logging")]
pub fn init() {
    if cfg!(feature = "logging-json") {
        builder().json().init();
    } else {
        builder().pretty().init();
    }
}

/// One JSON object per event, at DEBUG
#[cfg(feature = "logging")]
pub fn init_json() {
    builder().json().init();
}

/// Human-readable output, at DEBUG
#[cfg(feature = "logging")]
pub fn init_pretty() {
    builder().pretty().init();
}

/// Install a subscriber showing only this crate's events
#[cfg(feature = "logging")]
pub fn init_context_only() {
    builder().context_only().pretty().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = LoggingBuilder::default();
        assert_eq!(builder.level, Level::DEBUG);
        assert_eq!(builder.format, LogFormat::Json);
        assert_eq!(builder.directive(), "DEBUG");
    }

    #[test]
    fn test_context_only_directive() {
        let builder = LoggingBuilder::new().trace().compact().with_file().context_only();

        assert_eq!(builder.format, LogFormat::Compact);
        assert!(builder.with_file);
        assert_eq!(builder.directive(), "bean_context=TRACE");
    }
}
