use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

pub use anyhow::{anyhow, bail, Context, Result};

pub type EmptyRes = Result<()>;

#[macro_export]
macro_rules! err {
    ($($arg:tt)*) => {
        Err(anyhow!($($arg)*))
    };
}

#[macro_export]
macro_rules! require {
    ($cond:expr, $($arg:tt)*) => {
        if !($cond) {
            bail!($($arg)*)
        }
    };
}

pub fn measure<T, L: FnOnce(&T, u128)>(block: impl FnOnce() -> T, after: L) -> T {
    let start_time = Instant::now();
    let result = block();
    after(&result, start_time.elapsed().as_millis());
    result
}

pub fn to_hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Cooperative cancellation flag, checked at network boundaries.
/// Cloning yields a handle to the same flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn ensure_live(&self) -> EmptyRes {
        if self.is_cancelled() {
            bail!("Operation cancelled");
        }
        Ok(())
    }
}

/// Runs a fallible remote operation up to `attempts` times, warning on each failure.
pub fn with_retries<T>(what: &str, attempts: usize, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    assert!(attempts > 0);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                log::warn!("{what} failed (attempt {attempt}/{attempts}): {e:#}");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap())
}
