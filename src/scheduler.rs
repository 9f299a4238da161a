//! Wall-clock aligned cycle loop.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Offset, TimeZone, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// One unit of scheduled work. The loop never overlaps two runs.
#[async_trait]
pub trait Cycle: Send {
    async fn run_once(&mut self) -> Result<()>;
}

/// Next multiple of `delay_minutes` on the local clock strictly after `now`.
/// Slots are counted from local midnight of the epoch, so a delay that
/// divides a day lands on the same wall times every day.
pub fn next_aligned(now: DateTime<Utc>, tz_hours: i32, delay_minutes: u32) -> DateTime<Utc> {
    let delay = i64::from(delay_minutes.max(1)) * 60;
    let offset = i64::from(tz_hours) * 3600;
    let local = now.timestamp() + offset;
    let next_local = local - local.rem_euclid(delay) + delay;
    Utc.timestamp_opt(next_local - offset, 0)
        .single()
        .unwrap_or_else(|| now + ChronoDuration::seconds(delay))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    pub timezone: i32,
    pub delay_minutes: u32,
}

impl Scheduler {
    pub fn new(timezone: i32, delay_minutes: u32) -> Self {
        Self {
            timezone,
            delay_minutes,
        }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timezone * 3600).unwrap_or_else(|| Utc.fix())
    }

    /// Run `cycle` now, then at every aligned slot until `shutdown` turns
    /// true. A running cycle is never interrupted.
    pub async fn run(&self, cycle: &mut dyn Cycle, mut shutdown: watch::Receiver<bool>) {
        let offset = self.offset();
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = cycle.run_once().await {
                error!(?err, "cycle failed");
            }
            if *shutdown.borrow() {
                break;
            }

            let now = Utc::now();
            let next = next_aligned(now, self.timezone, self.delay_minutes);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next = %next.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S %:z"), "next cycle scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("shutdown sender dropped; continuing without signal handling");
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }
        info!("scheduler stopped");
    }
}
