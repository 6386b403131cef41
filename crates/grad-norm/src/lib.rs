//! Gradient norm diagnostics for candle training loops.
//!
//! [`grad_norm`] inspects the [`GradStore`](candle_core::backprop::GradStore)
//! produced by `backward()` and reports the p-norm of every parameter's
//! gradient together with a total entry, keyed so the map can be handed
//! straight to a metrics sink.

pub mod config;
pub mod error;
pub mod grads;
pub mod logging;
pub mod norm;
pub mod tracker;

pub use config::GradNormConfig;
pub use error::{GradNormError, Result};
pub use grads::{grad_norm, GradNormReport, NamedParameters};
pub use logging::GradNormLogger;
pub use norm::{IntoNormOrder, NormOrder};
pub use tracker::GradNormTracker;
