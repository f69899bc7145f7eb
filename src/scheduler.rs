//! Fortnightly export trigger: days 1 and 15 of every month at a fixed local hour.

use crate::jobs::{Job, JobQueue};
use crate::periods::local_midnight;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone};
use chrono_tz::Tz;
use std::time::Duration;

const RUN_DAYS: [u32; 2] = [1, 15];

/// Next run strictly after `now`.
pub fn next_export_run(now: DateTime<Tz>, hour: u32) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut year = now.year();
    let mut month = now.month();

    loop {
        for day in RUN_DAYS {
            let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                continue;
            };
            let candidate = at_local_hour(tz, date, hour);
            if candidate > now {
                return candidate;
            }
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
}

fn at_local_hour(tz: Tz, date: NaiveDate, hour: u32) -> DateTime<Tz> {
    date.and_hms_opt(hour, 0, 0)
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .unwrap_or_else(|| {
            // hour falls in a DST gap: midnight plus the hour offset
            let midnight = local_midnight(tz, date);
            tz.timestamp_opt(midnight, 0)
                .single()
                .map(|m| m + ChronoDuration::hours(hour as i64))
                .unwrap_or_else(|| tz.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).unwrap_or_default()))
        })
}

/// Spawns the loop that submits [`Job::ExportAllClients`] on every run date.
pub fn spawn(queue: JobQueue, tz: Tz, hour: u32) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = chrono::Utc::now().with_timezone(&tz);
            let next = next_export_run(now, hour);
            tracing::info!("⏰ Next scheduled export at {}", next);

            let wait = (next - now).to_std().unwrap_or(Duration::from_secs(1));
            tokio::time::sleep(wait).await;

            match queue.submit(Job::ExportAllClients).await {
                Ok(id) => tracing::info!("🔄 Scheduled export queued as job {}", id),
                Err(e) => tracing::error!("❌ Could not queue scheduled export: {}", e),
            }
        }
    })
}
