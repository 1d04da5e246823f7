//! Leveled diagnostic output.
//!
//! The crate logs through `tracing`. This module turns those events into
//! `DIAG: {text}` lines on stderr, gated by a [`Verbosity`] threshold that is
//! fixed when the [`Diagnostics`] value is built.
//!
//! | tracing level       | verbosity needed |
//! |---------------------|------------------|
//! | `ERROR`, `WARN`     | 0 (quiet)        |
//! | `INFO`              | 1 (summary)      |
//! | `DEBUG`             | 2 (detailed)     |
//! | `TRACE`             | 3                |

use std::fmt::{self, Write as _};

use tracing::level_filters::LevelFilter;
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Prefix of every diagnostic line.
pub const DIAG_PREFIX: &str = "DIAG: ";

/// Diagnostic verbosity threshold.
///
/// Ordered; a line is printed iff its level is `<=` the configured verbosity.
/// Negative values silence everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Verbosity(i32);

impl Verbosity {
    /// Only warnings and errors.
    pub const QUIET: Self = Self(0);
    /// Connection lifecycle milestones.
    pub const SUMMARY: Self = Self(1);
    /// Every scan attempt and every forwarded payload.
    pub const DETAILED: Self = Self(2);
    /// Everything, including BLE stack internals.
    pub const TRACE: Self = Self(3);

    /// Create a verbosity from a raw level.
    pub const fn new(level: i32) -> Self {
        Self(level)
    }

    /// Raw level.
    pub fn level(self) -> i32 {
        self.0
    }

    /// Combine a base level with `-v`/`-q` style counters.
    pub fn from_flags(base: Self, increments: u8, decrements: u8) -> Self {
        Self(base.0 + i32::from(increments) - i32::from(decrements))
    }

    /// The `tracing` filter equivalent to this threshold.
    ///
    /// This is the only place levels are mapped to verbosity.
    pub fn level_filter(self) -> LevelFilter {
        match self.0 {
            i32::MIN..=-1 => LevelFilter::OFF,
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Self::SUMMARY
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::QUIET => write!(f, "quiet"),
            Self::SUMMARY => write!(f, "summary"),
            Self::DETAILED => write!(f, "detailed"),
            Self(level) if level < 0 => write!(f, "silent ({})", level),
            Self(level) => write!(f, "trace ({})", level),
        }
    }
}

/// Renders an event as a single `DIAG: {text}` line.
///
/// Only the event's fields are written; no timestamp, level or target.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagFormat;

impl<S, N> FormatEvent<S, N> for DiagFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        writer.write_str(DIAG_PREFIX)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Diagnostics facility configured with a fixed verbosity.
#[derive(Debug, Clone, Copy)]
pub struct Diagnostics {
    verbosity: Verbosity,
}

impl Diagnostics {
    /// Create a diagnostics facility printing up to `verbosity`.
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    /// The configured threshold.
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Build a subscriber writing diagnostic lines to `writer`.
    ///
    /// The BLE stack's own events are capped at `WARN` unless the
    /// verbosity asks for trace output.
    pub fn subscriber<W>(&self, writer: W) -> impl Subscriber + Send + Sync + 'static
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let level = self.verbosity.level_filter();
        let stack_level = if self.verbosity >= Verbosity::TRACE {
            level
        } else {
            level.min(LevelFilter::WARN)
        };
        let filter = Targets::new()
            .with_target("btleplug", stack_level)
            .with_default(level);

        tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .event_format(DiagFormat)
                .with_filter(filter),
        )
    }

    /// Install the stderr subscriber as the process-wide default.
    ///
    /// # Errors
    ///
    /// Fails if a global subscriber was already installed.
    pub fn install(&self) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
        tracing::subscriber::set_global_default(self.subscriber(std::io::stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::NotificationEvent;
    use crate::router::NotificationRouter;
    use crate::sink::MemorySink;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::io;
    use std::sync::Arc;
    use tracing::{debug, info, trace, warn};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    fn capture(verbosity: Verbosity, emit: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = Diagnostics::new(verbosity).subscriber(move || writer.clone());
        tracing::subscriber::with_default(subscriber, emit);
        captured.text()
    }

    fn emit_all() {
        warn!("warning");
        info!("summary line");
        debug!("detail line");
        trace!("trace line");
    }

    #[test]
    fn test_summary_verbosity_gates_detail() {
        let out = capture(Verbosity::SUMMARY, emit_all);
        assert_eq!(out, "DIAG: warning\nDIAG: summary line\n");
    }

    #[test]
    fn test_detailed_verbosity() {
        let out = capture(Verbosity::DETAILED, emit_all);
        assert_eq!(
            out,
            "DIAG: warning\nDIAG: summary line\nDIAG: detail line\n"
        );
    }

    #[test]
    fn test_negative_verbosity_is_silent() {
        let out = capture(Verbosity::new(-1), emit_all);
        assert_eq!(out, "");
    }

    #[test]
    fn test_formatted_fields() {
        let out = capture(Verbosity::SUMMARY, || {
            info!("connected to {}", "AA:BB:CC:DD:EE:FF");
        });
        assert_eq!(out, "DIAG: connected to AA:BB:CC:DD:EE:FF\n");
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(Verbosity::from_flags(Verbosity::SUMMARY, 0, 0), Verbosity::SUMMARY);
        assert_eq!(Verbosity::from_flags(Verbosity::SUMMARY, 2, 0), Verbosity::TRACE);
        assert_eq!(Verbosity::from_flags(Verbosity::SUMMARY, 1, 1), Verbosity::SUMMARY);
        assert_eq!(Verbosity::from_flags(Verbosity::SUMMARY, 0, 3).level(), -2);
    }

    #[test]
    fn test_quiet_keeps_warnings_only() {
        let out = capture(Verbosity::QUIET, emit_all);
        assert_eq!(out, "DIAG: warning\n");
    }

    #[test]
    fn test_trace_verbosity_shows_everything() {
        let out = capture(Verbosity::new(7), emit_all);
        assert_eq!(
            out,
            "DIAG: warning\nDIAG: summary line\nDIAG: detail line\nDIAG: trace line\n"
        );
    }

    fn route_once(verbosity: Verbosity) -> String {
        capture(verbosity, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            let mut router = NotificationRouter::new(0x2e, MemorySink::new());
            let forwarded = runtime
                .block_on(router.route(&NotificationEvent::new(0x2e, vec![0x01, 0x02, 0x03])))
                .unwrap();
            assert!(forwarded);
        })
    }

    #[test]
    fn test_forwarded_payload_is_detailed() {
        assert_eq!(route_once(Verbosity::DETAILED), "DIAG: 01 02 03\n");
        assert_eq!(route_once(Verbosity::SUMMARY), "");
    }

    #[test]
    fn test_level_filter() {
        assert_eq!(Verbosity::new(-4).level_filter(), LevelFilter::OFF);
        assert_eq!(Verbosity::QUIET.level_filter(), LevelFilter::WARN);
        assert_eq!(Verbosity::DETAILED.level_filter(), LevelFilter::DEBUG);
        assert_eq!(Verbosity::new(9).level_filter(), LevelFilter::TRACE);
    }

    #[test]
    fn test_verbosity_display() {
        assert_eq!(Verbosity::default().to_string(), "summary");
        assert_eq!(Verbosity::new(-1).to_string(), "silent (-1)");
    }
}
