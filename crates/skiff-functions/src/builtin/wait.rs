//! Wait function

use crate::args::opt_arg_duration;
use crate::context::{FuncContext, FuncOutput};
use crate::error::{FuncError, Result};
use crate::params::TemplateParams;
use crate::progress::Progress;
use crate::traits::Func;
use async_trait::async_trait;
use skiff_crd::ValueMap;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Sleeps for `duration`, reporting elapsed time as a percentage
///
/// Arguments:
/// - `duration` (required): seconds, or a string like `"30s"`, `"5m"`, `"1h"`
pub struct WaitFunc;

const TICK: Duration = Duration::from_secs(1);

#[async_trait]
impl Func for WaitFunc {
    fn name(&self) -> &str {
        "Wait"
    }

    fn description(&self) -> &str {
        "Sleep for the given duration"
    }

    fn required_args(&self) -> Vec<&str> {
        vec!["duration"]
    }

    fn arguments(&self) -> Vec<&str> {
        vec!["duration"]
    }

    async fn exec(
        &self,
        ctx: &FuncContext,
        _params: &TemplateParams,
        args: &ValueMap,
    ) -> Result<FuncOutput> {
        let duration = opt_arg_duration(args, "duration")?.ok_or_else(|| {
            FuncError::MissingArgument {
                func: self.name().to_string(),
                arg: "duration".to_string(),
            }
        })?;
        debug!(phase = %ctx.phase(), ?duration, "Waiting");

        let start = Instant::now();
        let deadline = start + duration;
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        ctx.report(Progress::new(0, "Waiting"));
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Err(FuncError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick() => {
                    let pct = elapsed_percent(start.elapsed(), duration);
                    ctx.report(Progress::new(pct, "Waiting"));
                }
            }
        }

        ctx.report(Progress::completed());
        Ok(FuncOutput::new().with_output("waitedSeconds", duration.as_secs() as i64))
    }
}

fn elapsed_percent(elapsed: Duration, total: Duration) -> u8 {
    if total.is_zero() {
        return 100;
    }
    ((elapsed.as_secs_f64() / total.as_secs_f64()) * 100.0).min(100.0) as u8
}
