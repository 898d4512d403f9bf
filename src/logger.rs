// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Plain stdout/stderr logger.
//!
//! The imagebuilder scripts this tool drives print their own progress to the
//! terminal, so we stay on basic stdout/stderr rather than syslog and let the
//! two interleave.

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

struct Logger {
    level: LevelFilter,
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let msg = format!("{}: {}", record.level(), record.args());
        if record.level() <= Level::Warn {
            eprintln!("{}", msg);
        } else {
            println!("{}", msg);
        }
    }

    fn flush(&self) {}
}

/// Set up logging. `debug` lowers the cutoff from Info to Debug.
pub fn init(debug: bool) -> Result<(), SetLoggerError> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    log::set_boxed_logger(Box::new(Logger { level })).map(|()| log::set_max_level(level))
}
