//! Kernel Log Sink
//!
//! Routes `log` records to a console writer installed at boot.
//!
//! # Format
//! ```text
//! [WARN  handles] high handle count: 229377 / 262144 handles
//! ```

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Writer that receives formatted log lines.
pub type Sink = &'static mut (dyn Write + Send);

/// `log` backend writing to a single console sink.
pub struct KernelLogger {
    sink: Mutex<Option<Sink>>,
}

static LOGGER: KernelLogger = KernelLogger {
    sink: Mutex::new(None),
};

/// Install the kernel logger.
///
/// Must be called once during boot; later calls replace the sink but the
/// logger registration itself fails.
pub fn init(sink: Sink, level: LevelFilter) -> Result<(), SetLoggerError> {
    *LOGGER.sink.lock() = Some(sink);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Format one record as a console line.
pub fn write_record(out: &mut dyn Write, record: &Record<'_>) -> fmt::Result {
    writeln!(
        out,
        "[{:<5} {}] {}",
        record.level(),
        record.target(),
        record.args()
    )
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = self.sink.lock().as_mut() {
            // Console errors are dropped; there is nowhere to report them.
            let _ = write_record(&mut **sink, record);
        }
    }

    fn flush(&self) {}
}
