//! Storage for accepted random-walk samples.

use indexmap::IndexMap;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{McmcError, Result};

/// Append-only store of (parameter vector, NLL) samples.
///
/// Insertion order is the chain order and is preserved; downstream
/// inference (interval estimation, projections) indexes parameters by the
/// stored names, whose order is stable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    /// One parameter vector per recorded step
    samples: Vec<Array1<f64>>,

    /// NLL value for each recorded step
    nlls: Vec<f64>,

    /// Parameter names: signal names first, then systematic slots
    param_names: Vec<String>,
}

impl Chain {
    /// Create a new empty chain.
    pub fn new(param_names: Vec<String>) -> Self {
        Self {
            samples: Vec::new(),
            nlls: Vec::new(),
            param_names,
        }
    }

    /// Append one sample.
    pub fn push(&mut self, params: Array1<f64>, nll: f64) {
        self.samples.push(params);
        self.nlls.push(nll);
    }

    /// Append a batch of samples, preserving their order. Used by the
    /// engine to flush its step buffer every sync interval.
    pub fn extend(&mut self, batch: impl IntoIterator<Item = (Array1<f64>, f64)>) {
        for (params, nll) in batch {
            self.push(params, nll);
        }
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Parameter names, in vector order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Stored samples as a matrix of shape (len - discard, n_params),
    /// skipping the first `discard` samples.
    pub fn flat_samples(&self, discard: usize) -> Array2<f64> {
        let n_params = self.param_names.len();
        if discard >= self.len() {
            return Array2::zeros((0, n_params));
        }
        let n_keep = self.len() - discard;
        let mut flat = Array2::zeros((n_keep, n_params));
        for (i, sample) in self.samples.iter().skip(discard).enumerate() {
            flat.row_mut(i).assign(sample);
        }
        flat
    }

    /// Stored NLL values, skipping the first `discard` samples.
    pub fn nlls(&self, discard: usize) -> Array1<f64> {
        if discard >= self.len() {
            return Array1::zeros(0);
        }
        Array1::from_iter(self.nlls.iter().skip(discard).copied())
    }

    /// Per-parameter view of the chain, keyed by parameter name.
    pub fn to_param_map(&self, discard: usize) -> IndexMap<String, Array1<f64>> {
        let flat = self.flat_samples(discard);
        let mut map = IndexMap::new();
        for (i, name) in self.param_names.iter().enumerate() {
            map.insert(name.clone(), flat.column(i).to_owned());
        }
        map
    }

    /// Merge another chain segment into this one. The segments must share
    /// parameter names; samples are appended in order.
    pub fn merge(&mut self, other: &Chain) -> Result<()> {
        if self.param_names != other.param_names {
            return Err(McmcError::InvalidParameter(format!(
                "cannot merge chains with different parameters: {:?} vs {:?}",
                self.param_names, other.param_names
            )));
        }
        self.samples.extend(other.samples.iter().cloned());
        self.nlls.extend(other.nlls.iter().copied());
        Ok(())
    }

    /// Save the chain to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)
            .map_err(|e| McmcError::Sampling(format!("failed to create chain file: {}", e)))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)
            .map_err(|e| McmcError::Sampling(format!("failed to serialize chain: {}", e)))?;
        writer
            .flush()
            .map_err(|e| McmcError::Sampling(format!("failed to flush chain file: {}", e)))?;
        Ok(())
    }

    /// Load a chain from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| McmcError::Sampling(format!("failed to open chain file: {}", e)))?;
        let mut reader = BufReader::new(file);
        let chain: Chain = bincode::deserialize_from(&mut reader)
            .map_err(|e| McmcError::Sampling(format!("failed to deserialize chain: {}", e)))?;
        Ok(chain)
    }
}
