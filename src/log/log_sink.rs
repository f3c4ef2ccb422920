use crate::log::log_level::LogLevel;

/// Destination for log messages.
///
/// Every component of the gateway carries an `Arc<dyn LogSink>` instead of
/// talking to a global logger, so tests can swap in a no-op sink.
/// Implementations must be `Send + Sync`: the media path logs from several
/// worker threads at once.
pub trait LogSink: Send + Sync {
    /// Records a log message.
    ///
    /// `target` is the static source of the log (e.g. the module path).
    fn log(&self, level: LogLevel, msg: &str, target: &'static str);
}
