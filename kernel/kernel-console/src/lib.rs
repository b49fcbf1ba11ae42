//! # Low-Level Console Logger
//!
//! A [`log::Log`] sink for the guest's diagnostic console. Output is
//! free-form plain text (`[LEVEL] target: message`), pushed through an
//! emit function installed at init; the guest binary wires that to
//! its console channel. No allocation, no buffering.

#![cfg_attr(not(test), no_std)]

use core::fmt::Write;
use core::sync::atomic::{AtomicUsize, Ordering};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// The emit callback: receives formatted fragments in order.
pub type EmitFn = fn(&str);

/// Console-backed logger. Install once via [`init`].
pub struct ConsoleLogger {
    emit: AtomicUsize,
    max_level: LevelFilter,
}

static LOGGER: ConsoleLogger = ConsoleLogger {
    emit: AtomicUsize::new(0),
    max_level: LevelFilter::Trace,
};

/// Install the console logger. Call once during early init, before any
/// other component logs.
///
/// # Errors
/// [`SetLoggerError`] if a logger is already installed.
pub fn init(emit: EmitFn, max_level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.emit.store(emit as usize, Ordering::Release);
    log::set_logger(&LOGGER)?;
    log::set_max_level(max_level);
    Ok(())
}

struct EmitWriter(EmitFn);

impl Write for EmitWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        (self.0)(s);
        Ok(())
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let raw = self.emit.load(Ordering::Acquire);
        if raw == 0 {
            return;
        }
        // SAFETY: the slot is only ever written with a valid `EmitFn`
        // by `init`, and zero is filtered above.
        let emit: EmitFn = unsafe { core::mem::transmute::<usize, EmitFn>(raw) };
        let mut w = EmitWriter(emit);
        // Formatting into the sink cannot fail; the sink is infallible.
        let _ = writeln!(
            w,
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        // no-op; the console channel is unbuffered
    }
}
