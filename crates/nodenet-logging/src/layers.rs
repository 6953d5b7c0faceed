//! Subscriber layers

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::TestWriter;
use tracing_subscriber::registry::LookupSpan;

use crate::config::{ConsoleFormat, LogConfig};

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// JSONL events with their span fields (node, conn, method) flattened in
pub fn json_layer<S, W>(writer: W) -> BoxedLayer<S>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .flatten_event(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(writer)
        .boxed()
}

/// Console layer for `config`, on stderr or the test capture; `None` when off
pub fn console_layer<S>(config: &LogConfig) -> Option<BoxedLayer<S>>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    let layer = match (config.console, config.captured) {
        (ConsoleFormat::Off, _) => return None,
        (ConsoleFormat::Json, false) => json_layer(io::stderr),
        (ConsoleFormat::Json, true) => json_layer(TestWriter::new()),
        (ConsoleFormat::Pretty, captured) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(config.ansi && !captured)
                .with_target(true);
            if captured {
                layer.with_writer(TestWriter::new()).boxed()
            } else {
                layer.with_writer(io::stderr).boxed()
            }
        }
    };
    Some(layer)
}

/// Non-blocking writer appending to `path`, creating parent directories
pub fn file_writer(path: &Path) -> io::Result<(NonBlocking, WorkerGuard)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(tracing_appender::non_blocking(file))
}
