#[cfg(test)]
use std::cell::RefCell;
use std::fs::{File, create_dir_all};
use std::io::{self, Write};
use std::path::Path;
#[cfg(test)]
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Log event types that determine which receivers should log the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogEvent {
    /// Single simulated auctions (CSV rows, very verbose)
    Draw,
    /// Per-bid estimates and per-bid failures
    Bid,
    /// Run-level information (loaded tables, batch summaries)
    Estimation,
    /// Scenario-level comparisons between variants
    Scenario,
    /// Validation results (pass/fail)
    Validation,
}

impl LogEvent {
    /// This event and every coarser one, finest first
    fn with_coarser(self) -> impl Iterator<Item = LogEvent> {
        [LogEvent::Draw, LogEvent::Bid, LogEvent::Estimation, LogEvent::Scenario, LogEvent::Validation]
            .into_iter()
            .filter(move |event| *event >= self)
    }
}

/// Trait for log receivers that can receive log messages
pub trait LogReceiver {
    /// Check if this receiver should handle the given log event
    fn should_log(&self, event: LogEvent) -> bool;

    fn write(&mut self, s: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

/// Console log receiver (writes to stdout)
pub struct ConsoleReceiver {
    enabled_events: Vec<LogEvent>,
}

impl ConsoleReceiver {
    pub fn new(enabled_events: Vec<LogEvent>) -> Box<dyn LogReceiver> {
        Box::new(Self { enabled_events })
    }
}

impl LogReceiver for ConsoleReceiver {
    fn should_log(&self, event: LogEvent) -> bool {
        self.enabled_events.contains(&event)
    }

    fn write(&mut self, s: &str) -> io::Result<()> {
        print!("{}", s);
        io::stdout().flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

/// File log receiver; the file is truncated and parent directories are created
pub struct FileReceiver {
    file: File,
    enabled_events: Vec<LogEvent>,
}

impl FileReceiver {
    pub fn new(path: &Path, enabled_events: Vec<LogEvent>) -> io::Result<Box<dyn LogReceiver>> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Box::new(Self { file, enabled_events }))
    }
}

impl LogReceiver for FileReceiver {
    fn should_log(&self, event: LogEvent) -> bool {
        self.enabled_events.contains(&event)
    }

    fn write(&mut self, s: &str) -> io::Result<()> {
        write!(self.file, "{}", s)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// In-memory receiver for tests; the buffer handle stays readable after the receiver is boxed
#[cfg(test)]
pub struct MemoryReceiver {
    buffer: Rc<RefCell<String>>,
    enabled_events: Vec<LogEvent>,
}

#[cfg(test)]
impl MemoryReceiver {
    pub fn new(enabled_events: Vec<LogEvent>) -> (Box<dyn LogReceiver>, Rc<RefCell<String>>) {
        let buffer = Rc::new(RefCell::new(String::new()));
        (Box::new(Self { buffer: Rc::clone(&buffer), enabled_events }), buffer)
    }
}

#[cfg(test)]
impl LogReceiver for MemoryReceiver {
    fn should_log(&self, event: LogEvent) -> bool {
        self.enabled_events.contains(&event)
    }

    fn write(&mut self, s: &str) -> io::Result<()> {
        self.buffer.borrow_mut().push_str(s);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Unique identifier for a receiver
pub type ReceiverId = usize;

static RECEIVER_ID_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Routes messages to every receiver listening for their event
pub struct Logger {
    receivers: Vec<(ReceiverId, Box<dyn LogReceiver>)>,
}

impl Logger {
    pub fn new() -> Self {
        Self {
            receivers: Vec::new(),
        }
    }

    /// Add a receiver to the logger and return its unique ID
    pub fn add_receiver(&mut self, receiver: Box<dyn LogReceiver>) -> ReceiverId {
        let id = RECEIVER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.receivers.push((id, receiver));
        id
    }

    pub fn remove_receiver(&mut self, id: ReceiverId) {
        self.receivers.retain(|(receiver_id, _)| *receiver_id != id);
    }

    /// Whether any receiver listens for `event`; lets callers skip formatting hot-path messages
    pub fn is_enabled(&self, event: LogEvent) -> bool {
        self.receivers.iter().any(|(_, receiver)| receiver.should_log(event))
    }

    pub fn log(&mut self, event: LogEvent, message: &str) -> io::Result<()> {
        for (_, receiver) in &mut self.receivers {
            if receiver.should_log(event) {
                receiver.write(message)?;
            }
        }
        Ok(())
    }

    pub fn logln(&mut self, event: LogEvent, message: &str) -> io::Result<()> {
        self.log(event, &format!("{}\n", message))
    }

    /// Send a prefixed line to receivers of `event` or of any coarser event, once per receiver.
    /// Hierarchy: Draw -> Bid -> Estimation -> Scenario -> Validation
    fn log_with_prefix(&mut self, event: LogEvent, prefix: &str, message: &str) -> io::Result<()> {
        let formatted_message = format!("{} {}\n", prefix, message);
        for (_, receiver) in &mut self.receivers {
            if event.with_coarser().any(|evt| receiver.should_log(evt)) {
                receiver.write(&formatted_message)?;
            }
        }
        Ok(())
    }

    /// "ERROR" line for `event` and all coarser events
    pub fn errln(&mut self, event: LogEvent, message: &str) -> io::Result<()> {
        self.log_with_prefix(event, "ERROR", message)
    }

    /// "WARNING" line for `event` and all coarser events
    pub fn warnln(&mut self, event: LogEvent, message: &str) -> io::Result<()> {
        self.log_with_prefix(event, "WARNING", message)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        for (_, receiver) in &mut self.receivers {
            receiver.flush()?;
        }
        Ok(())
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

/// Sanitize a string to be used as a filename
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

/// Log a formatted line (like println! but for logger)
#[macro_export]
macro_rules! logln {
    ($logger:expr, $event:expr, $($arg:tt)*) => {
        {
            let _ = $logger.logln($event, &format!($($arg)*));
        }
    };
}

/// Log a formatted string without newline
#[macro_export]
macro_rules! log {
    ($logger:expr, $event:expr, $($arg:tt)*) => {
        {
            let _ = $logger.log($event, &format!($($arg)*));
        }
    };
}

/// Log an ERROR line to the event and all coarser events
#[macro_export]
macro_rules! errln {
    ($logger:expr, $event:expr, $($arg:tt)*) => {
        {
            let _ = $logger.errln($event, &format!($($arg)*));
        }
    };
}

/// Log a WARNING line to the event and all coarser events
#[macro_export]
macro_rules! warnln {
    ($logger:expr, $event:expr, $($arg:tt)*) => {
        {
            let _ = $logger.warnln($event, &format!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("markup recovery"), "markup_recovery");
        assert_eq!(sanitize_filename("costs/run:1"), "costs_run_1");
    }

    #[test]
    fn test_routing_by_event() {
        let mut logger = Logger::new();
        let (receiver, buffer) = MemoryReceiver::new(vec![LogEvent::Bid]);
        logger.add_receiver(receiver);
        logln!(logger, LogEvent::Bid, "bid {}", 3);
        logln!(logger, LogEvent::Estimation, "summary");
        assert_eq!(buffer.borrow().as_str(), "bid 3\n");
        assert!(logger.is_enabled(LogEvent::Bid));
        assert!(!logger.is_enabled(LogEvent::Draw));
    }

    #[test]
    fn test_errors_reach_coarser_receivers_once() {
        let mut logger = Logger::new();
        let (validation, validation_buffer) = MemoryReceiver::new(vec![LogEvent::Estimation, LogEvent::Validation]);
        let (draws, draws_buffer) = MemoryReceiver::new(vec![LogEvent::Draw]);
        logger.add_receiver(validation);
        logger.add_receiver(draws);
        errln!(logger, LogEvent::Bid, "bid {} degenerate", 7);
        assert_eq!(validation_buffer.borrow().as_str(), "ERROR bid 7 degenerate\n");
        assert_eq!(draws_buffer.borrow().as_str(), "");
    }

    #[test]
    fn test_remove_receiver() {
        let mut logger = Logger::new();
        let (receiver, buffer) = MemoryReceiver::new(vec![LogEvent::Scenario]);
        let id = logger.add_receiver(receiver);
        warnln!(logger, LogEvent::Scenario, "first");
        logger.remove_receiver(id);
        warnln!(logger, LogEvent::Scenario, "second");
        assert_eq!(buffer.borrow().as_str(), "WARNING first\n");
    }
}
