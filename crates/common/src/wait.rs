use std::time::Duration;

/// Poll a fallible connect closure until it succeeds.
///
/// Intended for attaching to IPC resources that another process creates at
/// its own pace: the closure is retried every `poll_interval_ms` and the
/// reason for the last failure is logged at debug level while waiting.
pub fn wait_for_resource<F, T, E>(mut connect: F, poll_interval_ms: u64, resource_name: &str) -> T
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let mut attempts: u64 = 0;
    loop {
        match connect() {
            Ok(resource) => {
                tracing::info!("{} connected after {} attempts", resource_name, attempts + 1);
                return resource;
            }
            Err(e) => {
                attempts += 1;
                tracing::debug!("waiting for {} ({})", resource_name, e);
                std::thread::sleep(Duration::from_millis(poll_interval_ms));
            }
        }
    }
}

#[cfg(feature = "async")]
pub async fn wait_for_resource_async<F, T, E>(
    mut connect: F,
    poll_interval_ms: u64,
    resource_name: &str,
) -> T
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let mut attempts: u64 = 0;
    loop {
        match connect() {
            Ok(resource) => {
                tracing::info!("{} connected after {} attempts", resource_name, attempts + 1);
                return resource;
            }
            Err(e) => {
                attempts += 1;
                tracing::debug!("waiting for {} ({})", resource_name, e);
                tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
            }
        }
    }
}
