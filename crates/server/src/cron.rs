//! Cron driver.
//!
//! A single ticker aligned to minute boundaries scans every app's cron
//! entries and fires the ones whose schedule lands exactly on the current
//! minute. Fired entries invoke the evaluator in command mode. Failures
//! are logged, never retried; missed ticks are not caught up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use smallweb_config::ServerConfig;

use crate::app::{list_apps, App, Entrypoint};
use crate::envfile;
use crate::evaluator::Evaluator;

/// Minute-ticked scheduler for app cron entries.
pub struct CronDriver {
    config: ServerConfig,
    evaluator: Arc<Evaluator>,
}

impl CronDriver {
    pub fn new(config: ServerConfig, evaluator: Arc<Evaluator>) -> Self {
        Self { config, evaluator }
    }

    /// Run the driver loop forever, ticking at minute boundaries.
    pub async fn run(self) {
        info!("Starting cron driver");

        let millis_into_minute = (Utc::now().timestamp_millis().rem_euclid(60_000)) as u64;
        let first_tick = Instant::now() + Duration::from_millis(60_000 - millis_into_minute);
        let mut ticker = interval_at(first_tick, Duration::from_secs(60));

        loop {
            ticker.tick().await;
            self.tick(truncate_to_minute(Utc::now())).await;
        }
    }

    /// Scan all apps and fire the entries due at `now` (minute-truncated).
    async fn tick(&self, now: DateTime<Utc>) {
        let apps = match list_apps(&self.config.dir) {
            Ok(apps) => apps,
            Err(e) => {
                warn!(error = %e, "Failed to enumerate apps for cron tick");
                return;
            }
        };

        for name in apps {
            let app = match App::load(&self.config.dir, &name) {
                Ok(app) => app,
                Err(e) => {
                    warn!(app = %name, error = %e, "Skipping app in cron tick");
                    continue;
                }
            };

            for job in &app.config.crons {
                if !schedule_due(&job.schedule, now) {
                    continue;
                }
                self.fire(&app, &job.schedule, &job.args).await;
            }
        }
    }

    async fn fire(&self, app: &App, schedule: &str, args: &[String]) {
        let entrypoint = match app.entrypoint() {
            Ok(Entrypoint::File(path)) => path,
            Ok(Entrypoint::Reserved(_)) => {
                warn!(app = %app.name(), "Cron entry on a reserved entrypoint, skipping");
                return;
            }
            Err(e) => {
                warn!(app = %app.name(), error = %e, "Cron entry without entrypoint, skipping");
                return;
            }
        };

        let env = match envfile::compose(&self.config.dir, &entrypoint, &self.config.env) {
            Ok(env) => env,
            Err(e) => {
                warn!(app = %app.name(), error = %e, "Failed to compose cron env");
                return;
            }
        };

        info!(app = %app.name(), schedule = %schedule, ?args, "Firing cron entry");
        match self.evaluator.invoke_command(&entrypoint, env, args).await {
            Ok(status) if status.success() => {
                debug!(app = %app.name(), "Cron entry completed");
            }
            Ok(status) => {
                warn!(app = %app.name(), %status, "Cron entry exited non-zero");
            }
            Err(e) => {
                warn!(app = %app.name(), error = %e, "Cron invocation failed");
            }
        }
    }
}

/// Whether `schedule` fires exactly at the minute boundary `now`.
///
/// An entry is due iff the schedule's next occurrence strictly after
/// `now - 1s` equals `now`; this fires each matching minute exactly once
/// and never replays missed minutes.
pub fn schedule_due(schedule: &str, now: DateTime<Utc>) -> bool {
    let cron = match croner::Cron::new(schedule).parse() {
        Ok(cron) => cron,
        Err(e) => {
            warn!(schedule = %schedule, error = %e, "Unparsable cron schedule");
            return false;
        }
    };

    let from = now - chrono::Duration::seconds(1);
    match cron.find_next_occurrence(&from, false) {
        Ok(next) => next == now,
        Err(_) => false,
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minute(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, min, 0).unwrap()
    }

    #[test]
    fn test_every_minute_fires_each_minute() {
        assert!(schedule_due("* * * * *", minute(10, 0)));
        assert!(schedule_due("* * * * *", minute(10, 1)));
        assert!(schedule_due("* * * * *", minute(23, 59)));
    }

    #[test]
    fn test_hourly_schedule_fires_on_the_hour_only() {
        assert!(schedule_due("0 * * * *", minute(10, 0)));
        assert!(!schedule_due("0 * * * *", minute(10, 1)));
        assert!(!schedule_due("0 * * * *", minute(10, 59)));
    }

    #[test]
    fn test_specific_time() {
        assert!(schedule_due("30 4 * * *", minute(4, 30)));
        assert!(!schedule_due("30 4 * * *", minute(4, 29)));
        assert!(!schedule_due("30 4 * * *", minute(5, 30)));
    }

    #[test]
    fn test_step_schedule() {
        assert!(schedule_due("*/5 * * * *", minute(10, 5)));
        assert!(schedule_due("*/5 * * * *", minute(10, 0)));
        assert!(!schedule_due("*/5 * * * *", minute(10, 6)));
    }

    #[test]
    fn test_descriptor_schedule() {
        assert!(schedule_due("@hourly", minute(7, 0)));
        assert!(!schedule_due("@hourly", minute(7, 30)));
    }

    #[test]
    fn test_invalid_schedule_never_fires() {
        assert!(!schedule_due("not a schedule", minute(10, 0)));
    }

    #[test]
    fn test_truncate_to_minute() {
        let t = Utc.with_ymd_and_hms(2026, 3, 14, 10, 5, 42).unwrap();
        assert_eq!(truncate_to_minute(t), minute(10, 5));
    }
}
