use crate::log::{log_level::LogLevel, log_msg::LogMsg, logger_handle::LoggerHandle};

use std::{
    fs::OpenOptions,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
};

/// Buffered, non-blocking logger.
///
/// Media threads must never wait on disk I/O, so log messages are pushed onto
/// a bounded queue and written by a dedicated worker thread. When the queue is
/// full the message is dropped rather than blocking the caller. Output can go
/// to stdout, to a log file, or both.
pub struct Logger {
    handle: LoggerHandle,
    file_path: Option<PathBuf>,
    _thread: Option<thread::JoinHandle<()>>,
}

impl Logger {
    /// Starts the logger worker.
    ///
    /// `cap` bounds the in-flight queue; `console` enables stdout output;
    /// `logfile`, if set, is opened in append mode (falling back to a sink on
    /// error so logging never takes the gateway down).
    pub fn start(cap: usize, console: bool, logfile: Option<&Path>) -> Self {
        let (tx, rx) = mpsc::sync_channel::<LogMsg>(cap.max(16));
        let file_path = logfile.map(Path::to_path_buf);
        let file_path_clone = file_path.clone();

        let _thread = thread::Builder::new()
            .name("logger-worker".into())
            .spawn(move || {
                let mut file: Option<BufWriter<Box<dyn Write + Send>>> =
                    file_path_clone.as_ref().map(|p| {
                        let writer: Box<dyn Write + Send> = match OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(p)
                        {
                            Ok(f) => Box::new(f),
                            Err(_) => Box::new(io::sink()),
                        };
                        BufWriter::new(writer)
                    });

                let mut lines_written: u32 = 0;
                while let Ok(m) = rx.recv() {
                    let line = format!("[{}] {} {} | {}", m.level.tag(), m.ts_ms, m.target, m.text);
                    if console {
                        println!("{line}");
                    }
                    if let Some(out) = file.as_mut() {
                        let _ = writeln!(out, "{line}");
                        lines_written = lines_written.wrapping_add(1);
                        if lines_written % 100 == 0 {
                            let _ = out.flush();
                        }
                    }
                }
                if let Some(out) = file.as_mut() {
                    let _ = out.flush();
                }
            })
            .ok();

        Self {
            handle: LoggerHandle { tx },
            file_path,
            _thread,
        }
    }

    /// Cloneable sink that modules can keep for the process lifetime.
    #[must_use]
    pub fn handle(&self) -> LoggerHandle {
        self.handle.clone()
    }

    /// Non-blocking enqueue; the message is dropped if the queue is full.
    pub fn try_log<S: Into<String>>(
        &self,
        level: LogLevel,
        text: S,
        target: &'static str,
    ) -> Result<(), mpsc::TrySendError<LogMsg>> {
        self.handle.try_log(level, text, target)
    }

    /// Path of the log file, when file output is enabled.
    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }
}
