//! Colored stderr logging for the runner and the VM.
//!
//! Lines are stamped with the time since the first message, which is what
//! matters when reading how a script's quanta were scheduled.

use std::fmt::Display;
use std::io::Write;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Per-instruction tracing.
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        };
        f.pad(name)
    }
}

static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static STARTED: OnceLock<Instant> = OnceLock::new();

/// Sets the least severe level that is still written.
pub fn set_min_level(level: Level) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn enabled(level: Level) -> bool {
    level as u8 >= MIN_LEVEL.load(Ordering::Relaxed)
}

fn style(level: Level) -> ColorSpec {
    let mut spec = ColorSpec::new();
    match level {
        Level::Debug => spec.set_fg(Some(Color::Cyan)),
        Level::Info => &mut spec,
        Level::Warn => spec.set_fg(Some(Color::Yellow)).set_bold(true),
        Level::Error => spec.set_fg(Some(Color::Red)).set_bold(true),
    };
    spec
}

fn stamp(elapsed: Duration) -> String {
    format!("[{:>5}.{:03}s]", elapsed.as_secs(), elapsed.subsec_millis())
}

/// Writes one line. Use the `debug!`, `info!`, `warn!` and `error!` macros.
#[doc(hidden)]
pub fn log(level: Level, message: &str) {
    if !enabled(level) {
        return;
    }
    let elapsed = STARTED.get_or_init(Instant::now).elapsed();
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = stderr.set_color(&style(level));
    let _ = writeln!(stderr, "{} {:<5} {}", stamp(elapsed), level, message);
    let _ = stderr.reset();
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Debug, &format!($($arg)*))
        }
    }};
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Info, &format!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Warn, &format!($($arg)*))
        }
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Error, &format!($($arg)*))
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_by_severity() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn level_names_pad() {
        assert_eq!(format!("{:<5}|", Level::Info), "INFO |");
        assert_eq!(Level::Error.to_string(), "ERROR");
    }

    #[test]
    fn min_level_filters() {
        set_min_level(Level::Warn);
        assert!(!enabled(Level::Info));
        assert!(enabled(Level::Error));
        set_min_level(Level::Info);
        assert!(enabled(Level::Info));
        assert!(!enabled(Level::Debug));
    }

    #[test]
    fn stamp_shows_seconds_and_millis() {
        assert_eq!(stamp(Duration::from_millis(1_234)), "[    1.234s]");
        assert_eq!(stamp(Duration::ZERO), "[    0.000s]");
    }
}
