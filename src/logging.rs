//! Leveled logging setup: maps the four-level configured verbosity onto `env_logger`.

use std::io::Write;

use env_logger::Target;
use log::LevelFilter;

/// Build and install the process-wide logger.
///
/// `log_level` follows the grounding configuration's four-level scheme (0=Error, 1=Warn,
/// 2=Info, 3=Debug); `Trace` is intentionally unreachable from configuration. `log_file` of
/// `"stdout"` (or any unrecognized/empty value) logs to stdout; any other value is treated as
/// a file path to append to.
pub fn init(log_file: &str, log_level: u8) {
    let filter = match log_level {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(filter);
    builder.format(|buf, record| {
        writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args())
    });

    if log_file != "stdout" && !log_file.is_empty() {
        match std::fs::OpenOptions::new().create(true).append(true).open(log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("failed to open log file {log_file:?}: {e}, logging to stdout instead");
                builder.target(Target::Stdout);
            }
        }
    } else {
        builder.target(Target::Stdout);
    }

    // init() panics if a logger is already installed; try_init lets repeated calls in tests
    // be harmless.
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping_never_reaches_trace() {
        for level in 0..=3u8 {
            let filter = match level {
                0 => LevelFilter::Error,
                1 => LevelFilter::Warn,
                2 => LevelFilter::Info,
                _ => LevelFilter::Debug,
            };
            assert_ne!(filter, LevelFilter::Trace);
        }
    }
}
