//! I/O utilities for persistence operations.

use std::io::ErrorKind;

use crate::error::StoreError;

/// Classifies I/O errors into specific `StoreError` variants.
pub fn classify_io_error(error: std::io::Error, context: &str) -> StoreError {
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
            StoreError::TransientIoError(format!("{context}: {error}"))
        }
        ErrorKind::StorageFull => StoreError::DiskFull(format!("{context}: {error}")),
        _ => StoreError::IoError(format!("{context}: {error}")),
    }
}

/// Retries an operation that may fail with transient I/O errors.
pub fn retry_io_operation<F, T>(
    operation: F,
    max_retries: u32,
    retry_delay_ms: u64,
    context: &str,
) -> Result<T, StoreError>
where
    F: Fn() -> Result<T, StoreError>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempt += 1;
                if attempt > max_retries {
                    return Err(err);
                }
                if let StoreError::TransientIoError(_) = err {
                    tracing::warn!(
                        "transient I/O error in {context} (attempt {attempt}/{max_retries}): {err}"
                    );
                    if retry_delay_ms > 0 {
                        std::thread::sleep(std::time::Duration::from_millis(retry_delay_ms));
                    }
                    continue;
                }
                return Err(err);
            }
        }
    }
}
