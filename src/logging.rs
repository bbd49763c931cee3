use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Tracing event formatter tagging each line with the rank
///
/// Both processes share one terminal, so every line starts with
/// `[rank N]` and is coloured by level. No timestamps or targets.
pub struct RankFormatter {
    rank: usize,
}

impl RankFormatter {
    pub fn new(rank: usize) -> Self {
        Self { rank }
    }
}

impl<S, N> FormatEvent<S, N> for RankFormatter
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
        // format_fields writes directly, so buffer to colour the whole line
        let mut buffer = format!("[rank {}] ", self.rank);
        ctx.format_fields(Writer::new(&mut buffer), event)?;

        let line = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };
        writeln!(writer, "{}", line)
    }
}

/// Filter directive for a process of the given rank
///
/// Rank 1 stays silent unless verbose so that diagnostics come from rank 0.
pub fn filter_directive(verbose: bool, rank: usize) -> &'static str {
    match (verbose, rank) {
        (true, _) => "p2p_bench=debug",
        (false, 0) => "warn",
        (false, _) => "off",
    }
}

/// Install the global subscriber writing to standard error
///
/// The filter comes from the command line only; the environment is never
/// consulted.
pub fn init(verbose: bool, rank: usize) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter_directive(verbose, rank)))
        .with_writer(std::io::stderr)
        .event_format(RankFormatter::new(rank))
        .finish();

    // a second installation (e.g. from a test harness) keeps the first one
    let _ = tracing::subscriber::set_global_default(subscriber);
}
