//! Discrete hyperparameter search spaces and immutable assignments.
//!
//! A [`SearchSpace`] maps each hyperparameter name to a finite list of candidate
//! values. Sampling draws one value per name, uniformly and independently, and
//! yields a [`HyperParameters`] assignment that model builders read with the
//! typed getters.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MomentumError, Result};

static HP_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid hyperparameter regex"));

/// Name under which the minibatch size is searched.
pub const BATCH_SIZE: &str = "batch_size";

/// A single candidate value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HpValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl HpValue {
    fn kind(&self) -> &'static str {
        match self {
            HpValue::Bool(_) => "bool",
            HpValue::Int(_) => "int",
            HpValue::Float(_) => "float",
            HpValue::String(_) => "string",
        }
    }

    /// Returns the integer value, accepting floats with no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HpValue::Int(v) => Some(*v),
            HpValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the value as a float; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HpValue::Int(v) => Some(*v as f64),
            HpValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HpValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HpValue::String(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for HpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HpValue::Bool(v) => write!(f, "{}", v),
            HpValue::Int(v) => write!(f, "{}", v),
            HpValue::Float(v) => write!(f, "{}", v),
            HpValue::String(v) => write!(f, "\"{}\"", v),
        }
    }
}

macro_rules! impl_from {
    ($t:ty, $variant:ident) => {
        impl From<$t> for HpValue {
            fn from(value: $t) -> Self {
                HpValue::$variant(value)
            }
        }
    };
}

impl_from!(bool, Bool);
impl_from!(i64, Int);
impl_from!(f64, Float);
impl_from!(String, String);

impl From<&str> for HpValue {
    fn from(value: &str) -> Self {
        HpValue::String(value.to_string())
    }
}

/// A finite, named grid of candidate values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    choices: BTreeMap<String, Vec<HpValue>>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a choice dimension.
    ///
    /// Names must be lowercase identifiers, unique within the space, and carry at
    /// least one candidate.
    pub fn define_choice<V, I>(&mut self, name: &str, values: I) -> Result<()>
    where
        V: Into<HpValue>,
        I: IntoIterator<Item = V>,
    {
        if !HP_NAME_RE.is_match(name) {
            return Err(MomentumError::config(format!(
                "invalid hyperparameter name {:?}",
                name
            )));
        }
        if self.choices.contains_key(name) {
            return Err(MomentumError::config(format!(
                "hyperparameter {} is already defined",
                name
            )));
        }
        let values: Vec<HpValue> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(MomentumError::config(format!(
                "hyperparameter {} has no candidate values",
                name
            )));
        }
        self.choices.insert(name.to_string(), values);
        Ok(())
    }

    /// Builder-style variant of [`SearchSpace::define_choice`].
    pub fn with_choice<V, I>(mut self, name: &str, values: I) -> Result<Self>
    where
        V: Into<HpValue>,
        I: IntoIterator<Item = V>,
    {
        self.define_choice(name, values)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.choices.contains_key(name)
    }

    pub fn values(&self, name: &str) -> Option<&[HpValue]> {
        self.choices.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.choices.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Number of distinct assignments in the grid, saturating at `usize::MAX`.
    pub fn cardinality(&self) -> usize {
        self.choices
            .values()
            .fold(1usize, |acc, v| acc.saturating_mul(v.len()))
    }

    /// Draws one value per dimension, uniformly and independently.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> HyperParameters {
        let values = self
            .choices
            .iter()
            .filter_map(|(name, candidates)| {
                candidates
                    .choose(rng)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();
        HyperParameters { values }
    }
}

/// An immutable assignment of one value per hyperparameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HyperParameters {
    values: BTreeMap<String, HpValue>,
}

impl HyperParameters {
    pub fn from_values<K, V, I>(values: I) -> Self
    where
        K: Into<String>,
        V: Into<HpValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&HpValue> {
        self.values
            .get(name)
            .ok_or_else(|| MomentumError::UnknownHyperparameter {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get_int(&self, name: &str) -> Result<i64> {
        let value = self.get(name)?;
        value.as_i64().ok_or_else(|| type_error(name, "int", value))
    }

    pub fn get_float(&self, name: &str) -> Result<f64> {
        let value = self.get(name)?;
        value.as_f64().ok_or_else(|| type_error(name, "float", value))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        let value = self.get(name)?;
        value.as_bool().ok_or_else(|| type_error(name, "bool", value))
    }

    pub fn get_str(&self, name: &str) -> Result<&str> {
        let value = self.get(name)?;
        value.as_str().ok_or_else(|| type_error(name, "string", value))
    }

    /// Reads a strictly positive integer as `usize`.
    pub fn get_usize(&self, name: &str) -> Result<usize> {
        let raw = self.get_int(name)?;
        usize::try_from(raw)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| MomentumError::config(format!("{} must be positive, got {}", name, raw)))
    }

    /// The searched minibatch size.
    pub fn batch_size(&self) -> Result<usize> {
        self.get_usize(BATCH_SIZE)
    }

    /// Returns a copy with one value replaced or added.
    pub fn with_value(&self, name: &str, value: impl Into<HpValue>) -> Self {
        let mut values = self.values.clone();
        values.insert(name.to_string(), value.into());
        Self { values }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HpValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Canonical text form, stable across runs; used to detect repeated samples.
    pub fn fingerprint(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for HyperParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.fingerprint())
    }
}

fn type_error(name: &str, expected: &'static str, value: &HpValue) -> MomentumError {
    MomentumError::HyperparameterType {
        name: name.to_string(),
        expected,
        actual: format!("{} {}", value.kind(), value),
    }
}
