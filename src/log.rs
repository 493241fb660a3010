//! Process-wide log sink: a bounded in-memory ring of formatted lines,
//! mirrored to stdout above a configurable threshold.
//!
//! Call sites use the ordinary `tracing` macros. [`RingLayer`] formats every
//! event into one line (`yyyy-MM-dd, HH:mm:ss.fff LEVEL message [file:line]`)
//! and appends it to the ring, so the admin log endpoint can serve the most
//! recent lines without touching disk. The stdout mirror is a stock
//! `tracing_subscriber::fmt` layer gated by the configured level.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Mutex;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

/// Default number of retained lines.
pub const DEFAULT_CAPACITY: usize = 1000;

static RING: Mutex<VecDeque<String>> = Mutex::new(VecDeque::new());
static CAPACITY: Mutex<usize> = Mutex::new(DEFAULT_CAPACITY);

/// Install the ring layer plus the stdout mirror. Events below
/// `stdout_level` still reach the ring but are not printed.
pub fn init(stdout_level: Level, capacity: usize) {
    if let Ok(mut cap) = CAPACITY.lock() {
        *cap = capacity.max(1);
    }
    tracing_subscriber::registry()
        .with(RingLayer.with_filter(LevelFilter::DEBUG))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(LevelFilter::from_level(stdout_level)),
        )
        .init();
}

/// Snapshot of the retained lines, oldest first.
pub fn snapshot() -> Vec<String> {
    RING.lock().map(|q| q.iter().cloned().collect()).unwrap_or_default()
}

fn push(line: String) {
    let cap = CAPACITY.lock().map(|c| *c).unwrap_or(DEFAULT_CAPACITY);
    if let Ok(mut ring) = RING.lock() {
        while ring.len() >= cap {
            ring.pop_front();
        }
        ring.push_back(line);
    }
}

fn level_label(level: &Level) -> &'static str {
    match *level {
        Level::TRACE | Level::DEBUG => "DEBUG",
        Level::INFO => " INFO",
        Level::WARN => " WARN",
        Level::ERROR => "ERROR",
    }
}

/// Captures formatted events into the ring.
pub struct RingLayer;

impl<S: Subscriber> Layer<S> for RingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        let mut line = format!(
            "{} {} {}",
            chrono::Local::now().format("%Y-%m-%d, %H:%M:%S%.3f"),
            level_label(meta.level()),
            visitor.message,
        );
        if let (Some(file), Some(lineno)) = (meta.file(), meta.line()) {
            let _ = write!(line, " [{file}:{lineno}]");
        }
        push(line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.message, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.message, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded() {
        if let Ok(mut cap) = CAPACITY.lock() {
            *cap = 3;
        }
        for i in 0..10 {
            push(format!("line {i}"));
        }
        let lines = snapshot();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.last().map(String::as_str), Some("line 9"));
        if let Ok(mut cap) = CAPACITY.lock() {
            *cap = DEFAULT_CAPACITY;
        }
    }

    #[test]
    fn labels_are_aligned() {
        assert_eq!(level_label(&Level::DEBUG), "DEBUG");
        assert_eq!(level_label(&Level::INFO), " INFO");
        assert_eq!(level_label(&Level::ERROR), "ERROR");
    }
}
