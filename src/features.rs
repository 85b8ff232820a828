//! Sparse feature rows and the dictionary vectorizer that produces them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::{Result, ServiceError};
use crate::event::RideRecord;

/// One named input handed to a vectorizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue<'a> {
    /// One-hot encoded as `key=value`
    Category(&'a str),
    Number(f64),
}

// ---------- Sparse row ----------

/// A single sparse row. Column indices are strictly increasing. Absent and
/// stored-zero entries are distinct, so two rows are equal iff every stored
/// entry matches.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    dim: usize,
    indices: Vec<usize>,
    values: Vec<f32>,
}

impl FeatureVector {
    /// Build a row from unordered `(column, value)` entries. Duplicate columns
    /// are summed; entries outside `dim` and zeros are dropped.
    pub fn from_entries(dim: usize, entries: Vec<(usize, f32)>) -> Self {
        let row = Self::from_stored_entries(dim, entries);
        let (indices, values): (Vec<usize>, Vec<f32>) = row
            .indices
            .into_iter()
            .zip(row.values)
            .filter(|(_, v)| *v != 0.0)
            .unzip();
        Self { dim, indices, values }
    }

    /// Like `from_entries`, but every entry inside `dim` stays stored, zeros
    /// included. A stored zero is a real value to a tree model.
    pub fn from_stored_entries(dim: usize, mut entries: Vec<(usize, f32)>) -> Self {
        entries.sort_by_key(|(i, _)| *i);
        let mut indices: Vec<usize> = Vec::with_capacity(entries.len());
        let mut values: Vec<f32> = Vec::with_capacity(entries.len());
        for (i, v) in entries {
            if i >= dim {
                continue;
            }
            if indices.last() == Some(&i) {
                if let Some(last) = values.last_mut() {
                    *last += v;
                }
            } else {
                indices.push(i);
                values.push(v);
            }
        }
        Self { dim, indices, values }
    }

    /// Dense row, zeros dropped.
    pub fn from_dense(values: &[f32]) -> Self {
        let entries = values.iter().copied().enumerate().collect();
        Self::from_entries(values.len(), entries)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Stored value at `column`; `None` means the entry is absent (missing to
    /// a tree model, zero to a linear one).
    pub fn get(&self, column: usize) -> Option<f32> {
        self.indices
            .binary_search(&column)
            .ok()
            .map(|pos| self.values[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Number of columns where the two rows disagree (bitwise).
    pub fn differing_entries(&self, other: &FeatureVector) -> usize {
        let (mut a, mut b) = (self.iter().peekable(), other.iter().peekable());
        let mut diff = 0;
        loop {
            match (a.peek().copied(), b.peek().copied()) {
                (None, None) => break,
                (Some(_), None) => {
                    a.next();
                    diff += 1;
                }
                (None, Some(_)) => {
                    b.next();
                    diff += 1;
                }
                (Some((ia, va)), Some((ib, vb))) => {
                    if ia == ib {
                        if va.to_bits() != vb.to_bits() {
                            diff += 1;
                        }
                        a.next();
                        b.next();
                    } else if ia < ib {
                        a.next();
                        diff += 1;
                    } else {
                        b.next();
                        diff += 1;
                    }
                }
            }
        }
        diff
    }
}

impl PartialEq for FeatureVector {
    fn eq(&self, other: &Self) -> bool {
        self.dim == other.dim && self.differing_entries(other) == 0
    }
}

// ---------- Preprocessor seam ----------

/// Fitted transform turning a ride into a model-ready row.
pub trait Preprocessor: Send + Sync {
    fn transform(&self, ride: &RideRecord) -> Result<FeatureVector>;

    /// Width of every row this transform produces.
    fn dimension(&self) -> usize;
}

// ---------- Dictionary vectorizer ----------

#[derive(Serialize, Deserialize)]
struct VectorizerState {
    separator: String,
    input_keys: Vec<String>,
    feature_names: Vec<String>,
}

/// Maps named inputs onto a fixed, sorted vocabulary. String inputs are
/// one-hot encoded as `key=value`, numeric inputs keep their value under
/// `key`. Unseen categories are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "VectorizerState", into = "VectorizerState")]
pub struct DictVectorizer {
    separator: String,
    input_keys: Vec<String>,
    feature_names: Vec<String>,
    vocabulary: HashMap<String, usize>,
}

impl From<VectorizerState> for DictVectorizer {
    fn from(state: VectorizerState) -> Self {
        let vocabulary = state
            .feature_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            separator: state.separator,
            input_keys: state.input_keys,
            feature_names: state.feature_names,
            vocabulary,
        }
    }
}

impl From<DictVectorizer> for VectorizerState {
    fn from(v: DictVectorizer) -> Self {
        Self {
            separator: v.separator,
            input_keys: v.input_keys,
            feature_names: v.feature_names,
        }
    }
}

impl DictVectorizer {
    pub const DEFAULT_SEPARATOR: &'static str = "=";

    /// Learn the vocabulary from training rides.
    pub fn fit(rides: &[RideRecord]) -> Self {
        let mut names = BTreeSet::new();
        let mut keys = BTreeSet::new();
        for ride in rides {
            for (key, value) in ride.features() {
                keys.insert(key.to_string());
                names.insert(Self::feature_name(key, value, Self::DEFAULT_SEPARATOR));
            }
        }
        VectorizerState {
            separator: Self::DEFAULT_SEPARATOR.to_string(),
            input_keys: keys.into_iter().collect(),
            feature_names: names.into_iter().collect(),
        }
        .into()
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.vocabulary.get(name).copied()
    }

    fn feature_name(key: &str, value: FeatureValue<'_>, separator: &str) -> String {
        match value {
            FeatureValue::Category(v) => format!("{}{}{}", key, separator, v),
            FeatureValue::Number(_) => key.to_string(),
        }
    }

    /// Vectorize named inputs. Every key seen at fit time must be present.
    pub fn transform_features(&self, inputs: &[(&str, FeatureValue<'_>)]) -> Result<FeatureVector> {
        if let Some(missing) = self
            .input_keys
            .iter()
            .find(|k| !inputs.iter().any(|(key, _)| *key == k.as_str()))
        {
            return Err(ServiceError::MissingKey(missing.clone()));
        }

        let mut entries = Vec::with_capacity(inputs.len());
        for &(key, value) in inputs {
            let name = Self::feature_name(key, value, &self.separator);
            let Some(col) = self.index_of(&name) else {
                continue;
            };
            let v = match value {
                FeatureValue::Category(_) => 1.0,
                FeatureValue::Number(x) => x as f32,
            };
            entries.push((col, v));
        }
        Ok(FeatureVector::from_stored_entries(self.feature_names.len(), entries))
    }
}

impl Preprocessor for DictVectorizer {
    fn transform(&self, ride: &RideRecord) -> Result<FeatureVector> {
        self.transform_features(&ride.features())
    }

    fn dimension(&self) -> usize {
        self.feature_names.len()
    }
}
