// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Logging front end for the readout crates.
//!
//! Messages go through the [`log`] facade with the target
//! `readout.rust::<module path>`, so an application can filter acquisition
//! logs apart from its own. The library installs no logger.
//!
//! - [`info!`]: configuration summaries, such as NCO readbacks and the FIR stage.
//! - [`warn!`]: conditions that degrade data without failing the call.
//! - [`diagnostic!`]: per-step protocol tracing, silent unless switched on
//!   through [`init_logging`].

use std::sync::atomic::{AtomicBool, Ordering};

#[doc(hidden)]
pub use log as _log;

#[doc(hidden)]
#[macro_export]
macro_rules! __emit {
    ($level:ident, $($arg:tt)+) => {
        $crate::_log::$level!(target: concat!("readout.rust::", module_path!()), $($arg)+)
    };
}

/// Configuration summary of a device or session.
#[macro_export]
macro_rules! info {
    ($msg:literal, $($arg:tt)+) => {
        $crate::__emit!(info, $msg, $($arg)+);
    };
    ($msg:literal) => {
        $crate::__emit!(info, $msg);
    };
}

/// Data integrity warning: low decimation, quantization risk, sanitized
/// settings, truncated timestreams.
#[macro_export]
macro_rules! warn {
    ($msg:literal, $($arg:tt)+) => {
        $crate::__emit!(warn, $msg, $($arg)+);
    };
    ($msg:literal) => {
        $crate::__emit!(warn, $msg);
    };
}

/// Protocol trace at info level, emitted only with diagnostics enabled.
#[macro_export]
macro_rules! diagnostic {
    ($msg:literal, $($arg:tt)+) => {
        if $crate::is_diagnostics_enabled() {
            $crate::__emit!(info, $msg, $($arg)+);
        }
    };
    ($msg:literal) => {
        if $crate::is_diagnostics_enabled() {
            $crate::__emit!(info, $msg);
        }
    };
}

static DIAGNOSTICS: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn is_diagnostics_enabled() -> bool {
    DIAGNOSTICS.load(Ordering::Acquire)
}

/// Switch protocol tracing on or off.
///
/// The embedding application picks the logger for the `log` facade.
pub fn init_logging(with_diagnostics: bool) {
    DIAGNOSTICS.store(with_diagnostics, Ordering::Release);
}
