//! Leveled log backend for the `log` facade.
//!
//! Records are formatted on the calling thread and handed to a background
//! writer over a bounded channel, so logging from the reactor or a worker
//! costs one enqueue. A queue capacity of zero writes synchronously instead.

use crate::config::LogLevel;
use crate::error::{ServerError, ServerResult};
use crossbeam::channel::{self, Receiver, Sender};
use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::thread;

type Writer = Box<dyn Write + Send>;

enum Message {
    Line(String),
    Flush(Sender<()>),
}

enum Sink {
    Queue(Sender<Message>),
    Direct(Mutex<Writer>),
}

/// `log::Log` implementation writing to stderr or an append-mode file
pub struct AsyncLogger {
    level: LevelFilter,
    sink: Sink,
}

impl AsyncLogger {
    /// Build a logger; with a non-zero `queue_capacity` this spawns the writer thread
    pub fn new(level: LevelFilter, queue_capacity: usize, writer: Writer) -> ServerResult<Self> {
        let sink = if queue_capacity == 0 {
            Sink::Direct(Mutex::new(writer))
        } else {
            let (tx, rx) = channel::bounded(queue_capacity);
            thread::Builder::new()
                .name("httpd-log".to_string())
                .spawn(move || write_loop(rx, writer))
                .map_err(|e| ServerError::Startup(format!("Failed to spawn log writer: {}", e)))?;
            Sink::Queue(tx)
        };

        Ok(Self { level, sink })
    }
}

impl Log for AsyncLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format_record(record);
        match &self.sink {
            Sink::Queue(tx) => {
                let _ = tx.send(Message::Line(line));
            }
            Sink::Direct(writer) => {
                let _ = writer.lock().write_all(line.as_bytes());
            }
        }
    }

    /// Blocks until everything enqueued so far has been written
    fn flush(&self) {
        match &self.sink {
            Sink::Queue(tx) => {
                let (ack_tx, ack_rx) = channel::bounded(1);
                if tx.send(Message::Flush(ack_tx)).is_ok() {
                    let _ = ack_rx.recv();
                }
            }
            Sink::Direct(writer) => {
                let _ = writer.lock().flush();
            }
        }
    }
}

fn write_loop(rx: Receiver<Message>, mut writer: Writer) {
    for message in rx {
        match message {
            Message::Line(line) => {
                let _ = writer.write_all(line.as_bytes());
            }
            Message::Flush(ack) => {
                let _ = writer.flush();
                let _ = ack.send(());
            }
        }
    }
    let _ = writer.flush();
}

fn format_record(record: &Record) -> String {
    format!(
        "{} [{:<5}] {}: {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
        record.level(),
        record.target(),
        record.args()
    )
}

/// Install the process-wide logger.
///
/// Fails if a logger is already installed or the log file cannot be opened.
pub fn init(level: LogLevel, queue_capacity: usize, file: Option<&Path>) -> ServerResult<()> {
    let writer: Writer = match file {
        Some(path) => Box::new(OpenOptions::new().create(true).append(true).open(path)?),
        None => Box::new(io::stderr()),
    };

    let filter = level.to_filter();
    let logger = AsyncLogger::new(filter, queue_capacity, writer)?;

    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(filter);
    Ok(())
}

/// Wait for queued records to reach the sink
pub fn flush() {
    log::logger().flush();
}
