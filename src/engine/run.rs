//! Drive an engine's ticks from a real-time interval.

use std::time::Duration;

use chrono::TimeDelta;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use super::{DispatchError, Engine, OperationOptions};
use crate::handler::Context;

/// Tick `engine` every `interval` until `ctx` is cancelled.
///
/// Virtual time advances in step with real time, starting from the time in
/// `options`.
pub async fn run(
    engine: &mut Engine,
    ctx: &Context,
    interval: Duration,
    options: OperationOptions,
) -> Result<(), DispatchError> {
    run_time_scaled(engine, ctx, interval, options, 1.0).await
}

/// Like [`run`], but virtual time advances `factor` times faster than real
/// time.
///
/// Returns [`DispatchError::Cancelled`] once `ctx` is cancelled, or the first
/// error returned by a tick.
pub async fn run_time_scaled(
    engine: &mut Engine,
    ctx: &Context,
    interval: Duration,
    options: OperationOptions,
    factor: f64,
) -> Result<(), DispatchError> {
    let start = options.now();
    let started = Instant::now();
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(interval = ?interval, factor, start = %start, "Running engine");

    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                debug!("Engine run cancelled");
                return Err(DispatchError::Cancelled);
            }
            _ = ticker.tick() => {}
        }

        let elapsed = Duration::try_from_secs_f64(started.elapsed().as_secs_f64() * factor)
            .unwrap_or_default();
        let now = TimeDelta::from_std(elapsed)
            .ok()
            .and_then(|delta| start.checked_add_signed(delta))
            .unwrap_or(start);

        engine
            .tick(
                options
                    .clone()
                    .with_current_time(now)
                    .with_cancellation(ctx.cancellation().clone()),
            )
            .await?;
    }
}
