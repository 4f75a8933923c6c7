use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use shared_utils::time::now_micros;

use crate::services::booking::BookingService;

/// Periodically confirms appointments that are about to start.
pub struct ConfirmationJob {
    bookings: Arc<BookingService>,
    interval: StdDuration,
    horizon: Duration,
}

impl ConfirmationJob {
    pub fn new(bookings: Arc<BookingService>) -> Self {
        Self {
            bookings,
            interval: StdDuration::from_secs(15 * 60),
            horizon: Duration::hours(24),
        }
    }

    pub fn with_interval(mut self, interval: StdDuration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run_once(&self) -> usize {
        match self.bookings.confirm_upcoming(now_micros(), self.horizon).await {
            Ok(0) => 0,
            Ok(count) => {
                info!("Confirmed {} upcoming appointments", count);
                count
            }
            Err(e) => {
                error!("Appointment confirmation run failed: {}", e);
                0
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }
}
