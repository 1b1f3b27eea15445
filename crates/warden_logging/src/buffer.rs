//! In-memory capture of recent log events for the `get_logs` tool.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const DEFAULT_CAPACITY: usize = 500;

/// One captured log event.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts: DateTime<Utc>,
    pub level: String,
    /// Module path of the emitting component.
    pub component: String,
    pub message: String,
}

/// Filters applied when reading the buffer back.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub component: Option<String>,
    pub operation: Option<String>,
    pub count: Option<usize>,
}

/// Bounded ring of recent log records. Clone shares the ring.
#[derive(Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<VecDeque<LogRecord>>>,
}

impl LogBuffer {
    /// The tracing layer feeding this buffer.
    pub fn layer(&self) -> BufferLayer {
        BufferLayer {
            buffer: self.clone(),
        }
    }

    fn push(&self, record: LogRecord) {
        if let Ok(mut ring) = self.inner.lock() {
            if ring.len() >= DEFAULT_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(record);
        }
    }

    /// Newest-first records matching the query.
    pub fn query(&self, query: &LogQuery) -> Vec<LogRecord> {
        let ring = match self.inner.lock() {
            Ok(ring) => ring,
            Err(_) => return Vec::new(),
        };
        let count = query.count.unwrap_or(50);
        ring.iter()
            .rev()
            .filter(|r| {
                query
                    .level
                    .as_deref()
                    .map(|l| r.level.eq_ignore_ascii_case(l))
                    .unwrap_or(true)
            })
            .filter(|r| {
                query
                    .component
                    .as_deref()
                    .map(|c| r.component.contains(c))
                    .unwrap_or(true)
            })
            .filter(|r| {
                query
                    .operation
                    .as_deref()
                    .map(|o| r.message.contains(o))
                    .unwrap_or(true)
            })
            .take(count)
            .cloned()
            .collect()
    }
}

/// Layer that copies every event into the ring.
pub struct BufferLayer {
    buffer: LogBuffer,
}

impl<S: Subscriber> Layer<S> for BufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.buffer.push(LogRecord {
            ts: Utc::now(),
            level: event.metadata().level().to_string(),
            component: event.metadata().target().to_string(),
            message: visitor.into_message(),
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    extra: Vec<String>,
}

impl MessageVisitor {
    fn into_message(self) -> String {
        if self.extra.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.extra.join(" ")
        } else {
            format!("{} {}", self.message, self.extra.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.extra.push(format!("{}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.extra.push(format!("{}={}", field.name(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(level: &str, component: &str, message: &str) -> LogRecord {
        LogRecord {
            ts: Utc::now(),
            level: level.to_string(),
            component: component.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn query_filters_and_caps() {
        let buffer = LogBuffer::default();
        buffer.push(record("INFO", "warden_mcp::queue", "claimed job abc"));
        buffer.push(record("WARN", "warden_worker", "child ignored SIGTERM"));
        buffer.push(record("INFO", "warden_mcp::approvals", "approval decided"));

        let all = buffer.query(&LogQuery::default());
        assert_eq!(all.len(), 3);
        // Newest first.
        assert!(all[0].message.contains("approval"));

        let warns = buffer.query(&LogQuery {
            level: Some("warn".to_string()),
            ..LogQuery::default()
        });
        assert_eq!(warns.len(), 1);

        let queue_only = buffer.query(&LogQuery {
            component: Some("queue".to_string()),
            ..LogQuery::default()
        });
        assert_eq!(queue_only.len(), 1);

        let capped = buffer.query(&LogQuery {
            count: Some(2),
            ..LogQuery::default()
        });
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn ring_evicts_oldest() {
        let buffer = LogBuffer::default();
        for i in 0..(DEFAULT_CAPACITY + 10) {
            buffer.push(record("INFO", "test", &format!("event {}", i)));
        }
        let all = buffer.query(&LogQuery {
            count: Some(DEFAULT_CAPACITY * 2),
            ..LogQuery::default()
        });
        assert_eq!(all.len(), DEFAULT_CAPACITY);
        // Oldest entries were dropped.
        assert!(all.iter().all(|r| r.message != "event 0"));
    }
}
