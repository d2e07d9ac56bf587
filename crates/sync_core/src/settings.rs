use std::time::Duration;

use rand::Rng;

/// Tunables for establishing a subscription's connection.
///
/// The defaults mirror the engine's dashboard behavior: no connect timeout
/// (a connection that never completes its handshake stays `Connecting`
/// until the owner tears it down) and no retry.
#[derive(Debug, Clone)]
pub struct Settings {
    pub connect_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            reconnect: ReconnectPolicy::Off,
        }
    }
}

/// Retry policy for the initial connect. Retries never apply to a
/// connection that already reached `Open` and later dropped; the owner
/// rebuilds the subscription in that case.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    Off,
    Backoff {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: bool,
        max_attempts: u32,
    },
}

impl ReconnectPolicy {
    pub fn backoff_defaults() -> Self {
        ReconnectPolicy::Backoff {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            max_attempts: 10,
        }
    }

    /// Delay before the next dial, given how many dials have already
    /// failed. `None` means give up.
    pub fn delay_for(&self, failed_attempts: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Off => None,
            ReconnectPolicy::Backoff {
                initial,
                max,
                multiplier,
                jitter,
                max_attempts,
            } => {
                if failed_attempts >= *max_attempts {
                    return None;
                }
                let exponent = failed_attempts.saturating_sub(1) as i32;
                let raw = initial.as_secs_f64() * multiplier.powi(exponent);
                let capped = raw.min(max.as_secs_f64());
                let seconds = if *jitter {
                    rand::thread_rng().gen_range(0.0..=capped)
                } else {
                    capped
                };
                Some(Duration::from_secs_f64(seconds))
            }
        }
    }
}

/// Builds [`Settings`] from defaults plus `APP__*` environment overrides.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(v) = std::env::var("APP__CONNECT_TIMEOUT_MS") {
        if let Ok(millis) = v.parse::<u64>() {
            settings.connect_timeout = (millis > 0).then(|| Duration::from_millis(millis));
        }
    }

    if let Ok(v) = std::env::var("APP__RECONNECT") {
        if v.eq_ignore_ascii_case("backoff") {
            settings.reconnect = ReconnectPolicy::backoff_defaults();
        }
    }

    if let ReconnectPolicy::Backoff {
        initial,
        max,
        multiplier,
        jitter,
        max_attempts,
    } = &mut settings.reconnect
    {
        if let Ok(v) = std::env::var("APP__RECONNECT_INITIAL_MS") {
            if let Ok(millis) = v.parse::<u64>() {
                *initial = Duration::from_millis(millis);
            }
        }
        if let Ok(v) = std::env::var("APP__RECONNECT_MAX_MS") {
            if let Ok(millis) = v.parse::<u64>() {
                *max = Duration::from_millis(millis);
            }
        }
        if let Ok(v) = std::env::var("APP__RECONNECT_MULTIPLIER") {
            if let Ok(parsed) = v.parse::<f64>() {
                *multiplier = parsed;
            }
        }
        if let Ok(v) = std::env::var("APP__RECONNECT_JITTER") {
            *jitter = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Ok(v) = std::env::var("APP__RECONNECT_MAX_ATTEMPTS") {
            if let Ok(parsed) = v.parse::<u32>() {
                *max_attempts = parsed;
            }
        }
    }

    settings
}
