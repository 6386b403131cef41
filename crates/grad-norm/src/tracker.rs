//! Step-gated gradient norm tracking for training loops.

use candle_core::backprop::GradStore;

use crate::{
    config::GradNormConfig,
    error::Result,
    grads::{grad_norm, GradNormReport, NamedParameters},
    logging::GradNormLogger,
    norm::NormOrder,
};

const TOTAL_EMA_ALPHA: f64 = 0.1;

/// Running average of the total norm; the first sample seeds it.
#[derive(Debug, Clone)]
struct TotalEma {
    alpha: f64,
    value: Option<f64>,
}

impl TotalEma {
    fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    fn update(&mut self, total: f64) {
        self.value = Some(match self.value {
            Some(prev) => prev + self.alpha * (total - prev),
            None => total,
        });
    }
}

#[derive(Debug)]
pub struct GradNormTracker {
    norm_type: NormOrder,
    every_n_steps: usize,
    track_history: bool,
    total_ema: TotalEma,
    history: Vec<(usize, f64)>,
    logger: GradNormLogger,
}

impl GradNormTracker {
    pub fn new(config: &GradNormConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            norm_type: config.norm_type,
            every_n_steps: config.log_every_n_steps,
            track_history: config.track_history,
            total_ema: TotalEma::new(TOTAL_EMA_ALPHA),
            history: Vec::new(),
            logger: GradNormLogger::new(config.enable_stdout),
        })
    }

    pub fn norm_type(&self) -> NormOrder {
        self.norm_type
    }

    pub fn should_track(&self, step: usize) -> bool {
        step % self.every_n_steps == 0
    }

    /// Computes and logs the report for `step` when the step falls on the
    /// configured interval. Returns `None` for skipped steps.
    pub fn track<P>(
        &mut self,
        step: usize,
        parameters: &P,
        grads: &GradStore,
    ) -> Result<Option<GradNormReport>>
    where
        P: NamedParameters + ?Sized,
    {
        if !self.should_track(step) {
            return Ok(None);
        }

        let report = grad_norm(parameters, grads, self.norm_type)?;
        if let Some(total) = report.total() {
            self.total_ema.update(total);
            if self.track_history {
                self.history.push((step, total));
            }
        }
        self.logger.log(step, &report);
        Ok(Some(report))
    }

    pub fn total_ema(&self) -> Option<f64> {
        self.total_ema.value
    }

    /// `(step, total)` pairs, recorded only when history tracking is on.
    pub fn history(&self) -> &[(usize, f64)] {
        &self.history
    }
}
