//! Per-parameter gradient norms and their total.

use std::collections::{BTreeMap, HashMap};

use candle_core::{backprop::GradStore, Tensor, Var};
use candle_nn::VarMap;
use serde::{ser::SerializeMap, Serialize, Serializer};

use crate::{
    error::Result,
    norm::{IntoNormOrder, NormOrder},
};

/// Source of named parameters, listed in a stable order.
pub trait NamedParameters {
    fn named_parameters(&self) -> Vec<(String, Tensor)>;
}

impl NamedParameters for VarMap {
    /// `VarMap` keeps no insertion order, so parameters come back sorted by
    /// name.
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        let data = self
            .data()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut params = data
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect::<Vec<_>>();
        params.sort_by(|a, b| a.0.cmp(&b.0));
        params
    }
}

impl<S: AsRef<str>> NamedParameters for [(S, Tensor)] {
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.iter()
            .map(|(name, tensor)| (name.as_ref().to_string(), tensor.clone()))
            .collect()
    }
}

impl<S: AsRef<str>> NamedParameters for [(S, Var)] {
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.iter()
            .map(|(name, var)| (name.as_ref().to_string(), var.as_tensor().clone()))
            .collect()
    }
}

impl<S: AsRef<str>> NamedParameters for Vec<(S, Tensor)> {
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.as_slice().named_parameters()
    }
}

impl<S: AsRef<str>> NamedParameters for Vec<(S, Var)> {
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.as_slice().named_parameters()
    }
}

/// Gradient norms keyed by `grad_<order>_norm_<name>`, in parameter order,
/// followed by `grad_<order>_norm_total`.
#[derive(Debug, Clone, PartialEq)]
pub struct GradNormReport {
    norm_type: NormOrder,
    entries: Vec<(String, f64)>,
}

impl GradNormReport {
    fn empty(norm_type: NormOrder) -> Self {
        Self {
            norm_type,
            entries: Vec::new(),
        }
    }

    pub fn norm_type(&self) -> NormOrder {
        self.norm_type
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(key, _)| key == label)
            .map(|(_, value)| *value)
    }

    /// Norm of a single parameter's gradient, looked up by parameter name.
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.get(&label(self.norm_type, name))
    }

    pub fn total(&self) -> Option<f64> {
        self.entries.last().map(|(_, value)| *value)
    }

    pub fn total_label(&self) -> String {
        label(self.norm_type, "total")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), *value))
    }

    pub fn to_btree_map(&self) -> BTreeMap<String, f64> {
        self.entries.iter().cloned().collect()
    }
}

impl IntoIterator for GradNormReport {
    type Item = (String, f64);
    type IntoIter = std::vec::IntoIter<(String, f64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl From<GradNormReport> for BTreeMap<String, f64> {
    fn from(report: GradNormReport) -> Self {
        report.entries.into_iter().collect()
    }
}

impl From<GradNormReport> for HashMap<String, f64> {
    fn from(report: GradNormReport) -> Self {
        report.entries.into_iter().collect()
    }
}

impl Serialize for GradNormReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Computes the p-norm of every gradient in `grads` that belongs to one of
/// `parameters`, plus a total entry.
///
/// The total is the same p-norm taken over the per-parameter norms, not over
/// the raw gradient values. For `p = 2` and `p = ±inf` the two agree; for other
/// orders they generally do not. Values are rounded to four decimals.
/// Parameters without a gradient are skipped, and when none has one the
/// report is empty.
pub fn grad_norm<P, N>(parameters: &P, grads: &GradStore, norm_type: N) -> Result<GradNormReport>
where
    P: NamedParameters + ?Sized,
    N: IntoNormOrder,
{
    let norm_type = norm_type.into_norm_order()?;
    let mut report = GradNormReport::empty(norm_type);

    for (name, tensor) in parameters.named_parameters() {
        if let Some(grad) = grads.get(&tensor) {
            let norm = norm_type.apply_tensor(grad)?;
            report.entries.push((label(norm_type, &name), norm));
        }
    }

    if report.entries.is_empty() {
        return Ok(report);
    }

    let norms = report
        .entries
        .iter()
        .map(|(_, value)| *value)
        .collect::<Vec<_>>();
    let total = norm_type.apply(&norms);
    report.entries.push((label(norm_type, "total"), total));

    for (_, value) in report.entries.iter_mut() {
        *value = round4(*value);
    }

    log::debug!(
        "grad norms computed: order={} parameters={} total={:?}",
        norm_type,
        norms.len(),
        report.total()
    );
    Ok(report)
}

fn label(norm_type: NormOrder, name: &str) -> String {
    format!("grad_{}_norm_{}", norm_type.label(), name)
}

/// Rounds the exact binary value to four decimals, ties to even. Formatting
/// avoids the extra rounding step and overflow of scaling by 10^4.
fn round4(value: f64) -> f64 {
    format!("{value:.4}").parse().unwrap_or(value)
}
