use std::env;
use std::io::{stderr, Write};
use std::process;

use log::{Level, LevelFilter, Metadata, Record};

/// Plain stderr logger for the `log` facade. Diagnostics go to stderr so
/// artifact JSON on stdout (or redirected files) stays clean.
pub(crate) struct StderrLogger {
    pub(crate) debug_enabled: bool,
}

impl StderrLogger {
    // Honor Systemd telling us to use DEBUG log level
    pub(crate) fn from_env() -> Self {
        let mut logger = Self {
            debug_enabled: false,
        };

        if let Ok(level) = env::var("SYSTEMD_LOG_LEVEL") {
            if level == "debug" {
                logger.debug_enabled = true;
            }
        }

        logger
    }

    pub(crate) fn init(self) -> Result<(), log::SetLoggerError> {
        let max_log_level = if self.debug_enabled {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };

        log::set_boxed_logger(Box::new(self)).map(|()| log::set_max_level(max_log_level))
    }
}

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level()
            <= if self.debug_enabled {
                Level::Debug
            } else {
                Level::Info
            }
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let msg = format!(
                "systemd-snapshot[{}]: {} - {}\n",
                process::id(),
                record.level(),
                record.args()
            );

            stderr().write_all(msg.as_bytes()).unwrap_or_default();
        }
    }

    fn flush(&self) {
        // no need to flush, log() uses write_all()
    }
}
