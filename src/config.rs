//! Runtime configuration of what happens when a violation is detected.
//!
//! Whether checks run at all is decided at build time (see
//! [`crate::CHECKED`]); this module only chooses how a detected
//! violation terminates.

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

/// Environment variable read by [`init_from_env`].
pub const ENV_VAR: &str = "MEMSAFE_ON_VIOLATION";

static FAILURE_MODE: AtomicU8 = AtomicU8::new(FailureMode::Panic as u8);

/// How [`crate::fail`] terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FailureMode {
    /// Unwind with the diagnostic as panic message.
    #[default]
    Panic = 0,
    /// Print the diagnostic and abort the process.
    Abort = 1,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown failure mode `{0}`, expected `panic` or `abort`")]
    UnknownMode(String),

    #[error("{} is not valid unicode", ENV_VAR)]
    NotUnicode,
}

impl FromStr for FailureMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "panic" => Ok(FailureMode::Panic),
            "abort" => Ok(FailureMode::Abort),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

#[inline]
pub fn failure_mode() -> FailureMode {
    match FAILURE_MODE.load(Ordering::Relaxed) {
        1 => FailureMode::Abort,
        _ => FailureMode::Panic,
    }
}

/// Process-wide; affects every thread.
#[inline]
pub fn set_failure_mode(mode: FailureMode) {
    FAILURE_MODE.store(mode as u8, Ordering::Relaxed);
}

/// Set the failure mode from [`ENV_VAR`], if present.
///
/// Returns the mode in effect afterwards.
pub fn init_from_env() -> Result<FailureMode, ConfigError> {
    match std::env::var(ENV_VAR) {
        Ok(value) => {
            let mode = value.parse()?;
            set_failure_mode(mode);
            log::debug!("failure mode set to {mode:?} from {ENV_VAR}");
            Ok(mode)
        }
        Err(std::env::VarError::NotPresent) => Ok(failure_mode()),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode),
    }
}
