//! Leveled logging to stderr.
//!
//! Each line carries a UTC timestamp and a colored level tag:
//!
//! ```text
//! 2026-03-14 09:26:53.589 [WARN ] 127.0.0.1:50122: read failed: connection reset
//! ```
//!
//! Use the [`debug!`](crate::debug), [`info!`](crate::info),
//! [`warn!`](crate::warn) and [`error!`](crate::error) macros. Output is
//! silenced under `cfg(test)`. The minimum level defaults to `Info`; the
//! binaries take it from `--log` or the `RVM_LOG` environment variable.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Environment variable consulted by [`init_from_env`].
pub const LOG_ENV: &str = "RVM_LOG";

static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    fn color(self) -> ColorSpec {
        let mut spec = ColorSpec::new();
        match self {
            Level::Debug => spec.set_fg(Some(Color::Cyan)).set_dimmed(true),
            Level::Info => spec.set_fg(Some(Color::Green)),
            Level::Warn => spec.set_fg(Some(Color::Yellow)).set_bold(true),
            Level::Error => spec.set_fg(Some(Color::Red)).set_bold(true),
        };
        spec
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `pad` so width specifiers apply.
        f.pad(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

pub fn set_level(level: Level) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Whether messages at `level` are currently printed.
pub fn enabled(level: Level) -> bool {
    level as u8 >= MIN_LEVEL.load(Ordering::Relaxed)
}

/// Applies the level named by [`LOG_ENV`], if set and valid.
pub fn init_from_env() {
    if let Some(level) = std::env::var(LOG_ENV).ok().and_then(|v| v.parse().ok()) {
        set_level(level);
    }
}

/// Wall-clock time broken into UTC calendar fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timestamp {
    year: u32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    millis: u32,
}

impl Timestamp {
    fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_unix(since_epoch)
    }

    fn from_unix(since_epoch: Duration) -> Self {
        const SECS_PER_DAY: u64 = 86_400;
        let secs = since_epoch.as_secs();
        let (year, month, day) = civil_date(secs / SECS_PER_DAY);
        let time_of_day = (secs % SECS_PER_DAY) as u32;
        Self {
            year,
            month,
            day,
            hour: time_of_day / 3600,
            minute: time_of_day / 60 % 60,
            second: time_of_day % 60,
            millis: since_epoch.subsec_millis(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.millis
        )
    }
}

fn is_leap(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Turns a day count since 1970-01-01 into `(year, month, day)`.
fn civil_date(mut days: u64) -> (u32, u32, u32) {
    let mut year = 1970;
    loop {
        let year_len = if is_leap(year) { 366 } else { 365 };
        if days < year_len {
            break;
        }
        days -= year_len;
        year += 1;
    }

    let february = if is_leap(year) { 29 } else { 28 };
    let month_lengths = [31, february, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 1;
    for len in month_lengths {
        if days < len {
            break;
        }
        days -= len;
        month += 1;
    }
    (year, month, days as u32 + 1)
}

#[doc(hidden)]
pub fn log(level: Level, message: &str) {
    if !enabled(level) {
        return;
    }
    let stamp = Timestamp::now();
    let stream = StandardStream::stderr(ColorChoice::Auto);
    let mut stderr = stream.lock();

    let _ = write!(stderr, "{stamp} ");
    let _ = stderr.set_color(&level.color());
    let _ = write!(stderr, "[{level:<5}]");
    let _ = stderr.reset();
    let _ = writeln!(stderr, " {message}");
}

/// Shared body of the level macros.
#[doc(hidden)]
#[macro_export]
macro_rules! log_at {
    ($level:ident, $($arg:tt)*) => {{
        if cfg!(not(test)) && $crate::utils::log::enabled($crate::utils::log::Level::$level) {
            $crate::utils::log::log($crate::utils::log::Level::$level, &format!($($arg)*))
        }
    }};
}

/// Logs at `Debug`.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { $crate::log_at!(Debug, $($arg)*) };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::log_at!(Info, $($arg)*) };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::log_at!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { $crate::log_at!(Error, $($arg)*) };
}
