use chrono::Utc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use super::{ReservationError, ReservationService};

/// Background loop that cancels checkouts whose payment window has passed
/// and returns their stock. Runs alongside the HTTP server.
pub async fn run_expiry_sweeper(service: ReservationService, interval: Duration, batch_size: i64) {
    info!(
        interval_secs = interval.as_secs(),
        batch_size, "checkout expiry sweeper started"
    );

    loop {
        if let Err(e) = sweep(&service, batch_size).await {
            error!(error = %e, "checkout expiry sweep failed");
        }

        sleep(interval).await;
    }
}

/// One pass: keeps cancelling full batches until a short one comes back.
pub async fn sweep(service: &ReservationService, batch_size: i64) -> Result<usize, ReservationError> {
    let mut total = 0;
    loop {
        let cancelled = service.expire_stale_checkouts(Utc::now(), batch_size).await?;
        total += cancelled;
        if (cancelled as i64) < batch_size || cancelled == 0 {
            break;
        }
    }

    if total > 0 {
        info!(cancelled = total, "expired checkouts cancelled");
    } else {
        debug!("no expired checkouts");
    }
    Ok(total)
}
