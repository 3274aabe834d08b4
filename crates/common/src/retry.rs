use std::time::Duration;

/// Retry a function with exponential backoff.
///
/// The delay starts at `base_delay_ms` and doubles each attempt. The last
/// error is returned once `max_retries` attempts are exhausted.
pub fn retry_with_backoff<F, T, E>(
    mut f: F,
    max_retries: u32,
    base_delay_ms: u64,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match f() {
            Ok(result) => return Ok(result),
            Err(e) if attempt + 1 < max_retries => {
                let delay_ms = base_delay_ms * 2_u64.pow(attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}ms",
                    operation_name,
                    attempt + 1,
                    max_retries,
                    e,
                    delay_ms
                );
                std::thread::sleep(Duration::from_millis(delay_ms));
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("{} failed after {} attempts: {}", operation_name, max_retries, e);
                return Err(e);
            }
        }
    }
}
