use rand::Rng;
use std::time::Duration;

#[derive(Debug)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

/// Exponential backoff state for one operation
///
/// `sleep` waits `initial * 2^attempt` seconds (capped at `max`), then counts
/// the attempt. Once `max_retries` sleeps have been handed out the next call
/// returns `MaxRetriesExceeded` without sleeping.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: u64,
    max_delay: u64,
    max_retries: u32,
    current_attempt: u32,
    jitter_pct: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: u64, max: u64, retries: u32) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            max_retries: retries,
            current_attempt: 0,
            jitter_pct: 0.0,
        }
    }

    /// Spread each delay by up to `pct` in either direction
    pub fn with_jitter(mut self, pct: f64) -> Self {
        self.jitter_pct = pct.clamp(0.0, 1.0);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    fn base_delay_ms(&self, attempt: u32) -> u64 {
        let base_ms = self
            .initial_delay
            .saturating_mul(1_000)
            .saturating_mul(2_u64.saturating_pow(attempt));
        base_ms.min(self.max_delay.saturating_mul(1_000))
    }

    /// Longest time every remaining retry can spend sleeping, jitter included
    pub fn max_total_delay(&self) -> Duration {
        let total_ms: u64 = (self.current_attempt..self.max_retries)
            .map(|attempt| {
                let delay_ms = self.base_delay_ms(attempt);
                let spread = (delay_ms as f64 * self.jitter_pct) as u64;
                delay_ms.saturating_add(spread)
            })
            .fold(0, u64::saturating_add);
        Duration::from_millis(total_ms)
    }

    fn next_delay(&self) -> Duration {
        let delay_ms = self.base_delay_ms(self.current_attempt);

        if self.jitter_pct > 0.0 && delay_ms > 0 {
            let spread = (delay_ms as f64 * self.jitter_pct) as i64;
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            Duration::from_millis(delay_ms.saturating_add_signed(delta))
        } else {
            Duration::from_millis(delay_ms)
        }
    }

    fn advance(&mut self) -> Result<Duration, MaxRetriesExceeded> {
        if self.current_attempt >= self.max_retries {
            return Err(MaxRetriesExceeded);
        }

        let delay = self.next_delay();
        log::warn!(
            "⏳ Retry attempt {} of {} in {:.1}s",
            self.current_attempt + 1,
            self.max_retries,
            delay.as_secs_f64()
        );
        self.current_attempt += 1;
        Ok(delay)
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        let delay = self.advance()?;
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Blocking variant for synchronous datastore calls
    pub fn sleep_blocking(&mut self) -> Result<(), MaxRetriesExceeded> {
        let delay = self.advance()?;
        std::thread::sleep(delay);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Run `op` until it succeeds, fails with an error `is_transient` rejects, or
/// the backoff is exhausted. The last error is returned in the failure cases.
pub fn retry_blocking<F, T, E, P>(
    backoff: &mut ExponentialBackoff,
    is_transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) => {
                log::warn!("⚠️  Datastore busy: {}", e);
                if backoff.sleep_blocking().is_err() {
                    log::error!("❌ Giving up after {} retries: {}", backoff.attempts(), e);
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}
