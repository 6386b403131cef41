//! p-norm orders and the reductions that evaluate them.
//!
//! A [`NormOrder`] is a finite exponent or one of the two infinities.
//! Orders can be built from numbers or strings; anything that does not read
//! as a real number (NaN included) is rejected with
//! [`GradNormError::InvalidNormOrder`].

use std::{fmt, str::FromStr};

use candle_core::{DType, Tensor};
use serde::Deserialize;

use crate::error::{GradNormError, Result};

/// Order of the p-norm applied to gradients.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawNormOrder")]
pub enum NormOrder {
    /// `(Σ|x|^p)^(1/p)`; `p == 0` counts non-zero entries.
    Finite(f64),
    /// `max |x|`.
    Infinity,
    /// `min |x|`.
    NegInfinity,
}

impl NormOrder {
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() {
            return Err(GradNormError::invalid_norm_order(value));
        }
        Ok(if value == f64::INFINITY {
            NormOrder::Infinity
        } else if value == f64::NEG_INFINITY {
            NormOrder::NegInfinity
        } else {
            NormOrder::Finite(value)
        })
    }

    pub fn as_f64(self) -> f64 {
        match self {
            NormOrder::Finite(p) => p,
            NormOrder::Infinity => f64::INFINITY,
            NormOrder::NegInfinity => f64::NEG_INFINITY,
        }
    }

    /// Renders the order the way it appears inside report labels, using the
    /// shortest round-trip float form: `2.0`, `0.5`, `-1.0`, `1e-05`,
    /// `1e+16`, `inf`, `-inf`.
    pub fn label(self) -> String {
        match self {
            NormOrder::Infinity => "inf".to_string(),
            NormOrder::NegInfinity => "-inf".to_string(),
            NormOrder::Finite(p) => float_label(p),
        }
    }

    /// Norm of a plain slice of values.
    pub fn apply(self, values: &[f64]) -> f64 {
        match self {
            NormOrder::Infinity => values.iter().fold(0.0f64, |acc, v| acc.max(v.abs())),
            NormOrder::NegInfinity if values.is_empty() => 0.0,
            NormOrder::NegInfinity => values
                .iter()
                .fold(f64::INFINITY, |acc, v| acc.min(v.abs())),
            NormOrder::Finite(p) if p == 0.0 => values.iter().filter(|v| **v != 0.0).count() as f64,
            NormOrder::Finite(p) if p == 1.0 => values.iter().map(|v| v.abs()).sum(),
            NormOrder::Finite(p) if p == 2.0 => values.iter().map(|v| v * v).sum::<f64>().sqrt(),
            NormOrder::Finite(p) => values
                .iter()
                .map(|v| v.abs().powf(p))
                .sum::<f64>()
                .powf(1.0 / p),
        }
    }

    /// Norm of every element of `tensor`, reduced on the tensor's device.
    ///
    /// Half precision inputs are promoted to f32 before reducing; f64 stays
    /// f64. Empty tensors have norm zero.
    pub fn apply_tensor(self, tensor: &Tensor) -> Result<f64> {
        if tensor.elem_count() == 0 {
            return Ok(0.0);
        }
        let dtype = match tensor.dtype() {
            DType::F64 => DType::F64,
            _ => DType::F32,
        };
        let values = tensor.flatten_all()?.to_dtype(dtype)?;
        let reduced = match self {
            NormOrder::Infinity => values.abs()?.max_all()?,
            NormOrder::NegInfinity => values.abs()?.min_all()?,
            NormOrder::Finite(p) if p == 0.0 => values.ne(0.0)?.to_dtype(dtype)?.sum_all()?,
            NormOrder::Finite(p) if p == 1.0 => values.abs()?.sum_all()?,
            NormOrder::Finite(p) if p == 2.0 => values.sqr()?.sum_all()?.sqrt()?,
            NormOrder::Finite(p) => values.abs()?.powf(p)?.sum_all()?.powf(1.0 / p)?,
        };
        Ok(reduced.to_dtype(DType::F64)?.to_scalar::<f64>()?)
    }
}

impl Default for NormOrder {
    fn default() -> Self {
        NormOrder::Finite(2.0)
    }
}

impl fmt::Display for NormOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for NormOrder {
    type Err = GradNormError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let value = trimmed
            .parse::<f64>()
            .map_err(|_| GradNormError::invalid_norm_order(format!("'{s}'")))?;
        NormOrder::new(value)
    }
}

impl TryFrom<f64> for NormOrder {
    type Error = GradNormError;

    fn try_from(value: f64) -> Result<Self> {
        NormOrder::new(value)
    }
}

impl TryFrom<&str> for NormOrder {
    type Error = GradNormError;

    fn try_from(value: &str) -> Result<Self> {
        value.parse()
    }
}

/// Values accepted wherever a norm order is requested.
pub trait IntoNormOrder {
    fn into_norm_order(self) -> Result<NormOrder>;
}

impl IntoNormOrder for NormOrder {
    /// Re-normalizes through [`NormOrder::new`], so `Finite(inf)` becomes
    /// [`NormOrder::Infinity`] and `Finite(NaN)` is rejected.
    fn into_norm_order(self) -> Result<NormOrder> {
        NormOrder::new(self.as_f64())
    }
}

impl IntoNormOrder for f64 {
    fn into_norm_order(self) -> Result<NormOrder> {
        NormOrder::new(self)
    }
}

impl IntoNormOrder for f32 {
    fn into_norm_order(self) -> Result<NormOrder> {
        NormOrder::new(self as f64)
    }
}

macro_rules! int_norm_order {
    ($($ty:ty),*) => {
        $(
            impl IntoNormOrder for $ty {
                fn into_norm_order(self) -> Result<NormOrder> {
                    NormOrder::new(self as f64)
                }
            }
        )*
    };
}

int_norm_order!(i32, i64, u32, u64, usize);

impl IntoNormOrder for &str {
    fn into_norm_order(self) -> Result<NormOrder> {
        self.parse()
    }
}

impl IntoNormOrder for String {
    fn into_norm_order(self) -> Result<NormOrder> {
        self.parse()
    }
}

impl IntoNormOrder for &String {
    fn into_norm_order(self) -> Result<NormOrder> {
        self.parse()
    }
}

fn float_label(value: f64) -> String {
    let sci = format!("{:e}", value);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => return value.to_string(),
    };
    if (-4..16).contains(&exponent) {
        let fixed = value.to_string();
        if fixed.contains('.') {
            fixed
        } else {
            format!("{fixed}.0")
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNormOrder {
    Number(f64),
    Text(String),
}

impl TryFrom<RawNormOrder> for NormOrder {
    type Error = GradNormError;

    fn try_from(value: RawNormOrder) -> Result<Self> {
        match value {
            RawNormOrder::Number(v) => NormOrder::new(v),
            RawNormOrder::Text(s) => s.parse(),
        }
    }
}
