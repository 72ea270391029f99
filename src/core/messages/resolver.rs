//! Message resolution: cache, remote generation, static fallback.
//!
//! `resolve` never fails visibly. Wording for a (station, persona) pair
//! is not time-sensitive, so cache entries live for days; the remote
//! path is bounded by a timeout, a retry ceiling with exponential
//! backoff, and a rolling-minute rate limit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};

use super::remote::{MessageGenerator, RateLimiter};
use super::templates;
use crate::core::config::Settings;
use crate::core::model::{Persona, Station, StationId};

const RATE_WINDOW: Duration = Duration::from_secs(60);
const BACKOFF_BASE: Duration = Duration::from_millis(250);

struct CacheEntry {
    text: String,
    stored_at: Instant,
}

pub struct MessageResolver {
    generator: Arc<dyn MessageGenerator>,
    cache: Mutex<HashMap<(StationId, Persona), CacheEntry>>,
    limiter: Mutex<RateLimiter>,
    ttl: Duration,
    request_timeout: Duration,
    attempts: u32,
}

impl MessageResolver {
    pub fn new(generator: Arc<dyn MessageGenerator>, settings: &Settings) -> Self {
        Self {
            generator,
            cache: Mutex::new(HashMap::new()),
            limiter: Mutex::new(RateLimiter::new(settings.remote_per_minute, RATE_WINDOW)),
            ttl: settings.cache_ttl(),
            request_timeout: settings.remote_timeout(),
            attempts: settings.remote_attempts,
        }
    }

    /// Produce the notification body for an alert's station and persona.
    /// Always returns non-empty text within the timeout/retry bound.
    pub async fn resolve(&self, station: &Station, persona: Persona) -> String {
        if let Some(text) = self.cached(station.id, persona) {
            return text;
        }

        for attempt in 0..self.attempts {
            if !self.limiter.lock().unwrap().try_acquire(Instant::now()) {
                log::warn!(
                    "message generation rate-limited for station {}, using template",
                    station.id
                );
                break;
            }

            match timeout(
                self.request_timeout,
                self.generator.generate(&station.name, persona),
            )
            .await
            {
                Ok(Ok(text)) => {
                    self.store(station.id, persona, text.clone());
                    return text;
                }
                Ok(Err(err)) => {
                    log::warn!(
                        "message generation failed for station {} (attempt {}): {}",
                        station.id,
                        attempt + 1,
                        err
                    );
                }
                Err(_) => {
                    log::warn!(
                        "message generation timed out for station {} (attempt {})",
                        station.id,
                        attempt + 1
                    );
                }
            }

            if attempt + 1 < self.attempts {
                sleep(BACKOFF_BASE * 2u32.pow(attempt)).await;
            }
        }

        templates::fallback_message(&station.name, persona)
    }

    fn cached(&self, station_id: StationId, persona: Persona) -> Option<String> {
        let mut cache = self.cache.lock().unwrap();
        let key = (station_id, persona);
        match cache.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.text.clone()),
            Some(_) => {
                cache.remove(&key);
                None
            }
            None => None,
        }
    }

    fn store(&self, station_id: StationId, persona: Persona, text: String) {
        self.cache.lock().unwrap().insert(
            (station_id, persona),
            CacheEntry {
                text,
                stored_at: Instant::now(),
            },
        );
    }
}
