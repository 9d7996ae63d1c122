use std::time::Duration;

use tokio::time::sleep;

use crate::{repository::schedules::sweep_overdue, state::AppState};

const TICK: Duration = Duration::from_secs(15);

/// Spawn the background scheduler that keeps installment statuses current.
///
/// Each sweep runs in its own `tokio::spawn` so a failing query never stops
/// the loop.
pub async fn run_background_scheduler(state: AppState) {
    tracing::info!("Background scheduler started");

    let pool = match state.db_pool.as_ref() {
        Some(p) => p.clone(),
        None => {
            tracing::warn!("Scheduler: no database pool configured, exiting");
            return;
        }
    };

    let sweep_interval = Duration::from_secs(state.config.overdue_sweep_interval_seconds.max(60));
    // Run once shortly after boot, then on the configured interval.
    let mut last_sweep: Option<tokio::time::Instant> = None;
    let mut last_sweep_date = None;

    loop {
        sleep(TICK).await;

        let now_instant = tokio::time::Instant::now();
        let today = state.config.today();
        let interval_elapsed =
            last_sweep.map_or(true, |last| now_instant.duration_since(last) >= sweep_interval);
        let day_changed = last_sweep_date != Some(today);
        if !interval_elapsed && !day_changed {
            continue;
        }

        last_sweep = Some(now_instant);
        last_sweep_date = Some(today);
        let pool = pool.clone();
        let st = state.clone();
        tokio::spawn(async move {
            match sweep_overdue(&pool, today).await {
                Ok(0) => {}
                Ok(updated) => {
                    st.invalidate_dashboard().await;
                    tracing::info!(updated, %today, "Scheduler: overdue sweep completed");
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Scheduler: overdue sweep failed");
                }
            }
        });
    }
}
