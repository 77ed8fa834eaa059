//! Titled process-block logging helpers.
//!
//! Phases and the docker/git layers wrap their work in these helpers so
//! every user-visible operation is reported as a block with an explicit
//! success or failure tag.

use tracing::{error, info};

use crate::error::Result;

/// Run `f` as a titled process block. Emits the title before the work and a
/// terminating `[OK]` / `[FAILED]` tag after it.
pub fn log_process<T>(title: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    info!("{} ...", title);
    match f() {
        Ok(value) => {
            info!("{} [OK]", title);
            Ok(value)
        }
        Err(err) => {
            error!("{} [FAILED]", title);
            Err(err)
        }
    }
}

/// Like [`log_process`] but for service (bookkeeping) operations, which are
/// only tagged on failure.
pub fn log_service_process<T>(title: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    info!("{}:", title);
    match f() {
        Ok(value) => Ok(value),
        Err(err) => {
            error!("{} [FAILED]", title);
            Err(err)
        }
    }
}

/// One-line state report, e.g. `install [USING CACHE]`.
pub fn log_service_state(message: &str, state: &str) {
    info!("{:>20} {}", message, state);
}
