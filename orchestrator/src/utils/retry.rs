use std::thread::sleep;
use std::time::Duration;

/// Retries `f` after `interval` has elapsed, until `max_attempts` is
/// reached. Returns the first success or the last error.
pub fn retry<F, T, E>(max_attempts: usize, interval: Duration, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
{
    let mut last_err = None;
    for attempt in 0..max_attempts {
        match f() {
            Ok(result) => return Ok(result),
            Err(err) => {
                last_err = Some(err);
                if attempt + 1 < max_attempts {
                    sleep(interval);
                }
            }
        }
    }
    Err(last_err.expect("some error must exist at this point"))
}
