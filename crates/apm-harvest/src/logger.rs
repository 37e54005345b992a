// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line formatting for the agent.
//!
//! ```text
//! APM_AGENT | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```
//!
//! The prefix makes agent output easy to pick out of the host application's
//! own logs.

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;
use crate::error::HarvestError;

pub const LOG_PREFIX: &str = "APM_AGENT";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

fn env_filter(level: LogLevel) -> Result<EnvFilter, HarvestError> {
    EnvFilter::try_new(level.as_filter_directive())
        .map_err(|e| HarvestError::Logging(format!("could not parse log level: {e}")))
}

/// Installs the agent formatter as the global subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init(level: LogLevel) -> Result<(), HarvestError> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(level)?)
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| HarvestError::Logging(format!("setting default subscriber failed: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing::{info, info_span, warn};
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(level: LogLevel, emit: impl FnOnce()) -> String {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(env_filter(level).unwrap())
            // dev-dep `tracing-test` enables tracing-subscriber's `ansi` feature in
            // test builds only; match the non-ANSI production build.
            .with_ansi(false)
            .event_format(Formatter)
            .with_writer(captured.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_format_plain_event() {
        let output = capture(LogLevel::Info, || info!(count = 3, "Harvest complete"));
        assert_eq!(output, "APM_AGENT | INFO | Harvest complete count=3\n");
    }

    #[test]
    fn test_format_with_span() {
        let output = capture(LogLevel::Info, || {
            let span = info_span!("harvest", kind = "metrics");
            let _guard = span.enter();
            warn!("Dropping batch");
        });
        assert_eq!(
            output,
            "APM_AGENT | WARN | harvest{kind=\"metrics\"}: Dropping batch\n"
        );
    }

    #[test]
    fn test_level_filter() {
        let output = capture(LogLevel::Warn, || info!("hidden"));
        assert!(output.is_empty());
    }
}
