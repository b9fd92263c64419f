//! Hierarchical store of flat numeric arrays keyed by `group/sub/leaf`
//! paths, persisted as JSON.
//!
//! Non-finite values are written as the strings `"inf"`, `"-inf"` and
//! `"nan"`; crashed iterations record an infinite functional.

use crate::optimizer::OptimizationHistory;
use crate::regularization::RegularizationResults;
use crate::targets::TargetResults;
use crate::types::{CardiacError, CardiacResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultStore {
    #[serde(with = "json_values")]
    entries: BTreeMap<String, Vec<f64>>,
}

fn normalize(path: &str) -> CardiacResult<String> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Err(CardiacError::Configuration(format!("empty store path '{path}'")));
    }
    Ok(parts.join("/"))
}

fn join(group: &str, leaf: &str) -> String {
    format!("{}/{}", group.trim_end_matches('/'), leaf)
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write (or overwrite) one leaf array.
    pub fn write(&mut self, path: &str, data: &[f64]) -> CardiacResult<()> {
        let key = normalize(path)?;
        let prefix = format!("{key}/");
        if self.entries.keys().any(|k| k.starts_with(&prefix)) {
            return Err(CardiacError::Configuration(format!(
                "'{key}' is a group and cannot hold an array"
            )));
        }
        self.entries.insert(key, data.to_vec());
        Ok(())
    }

    pub fn read(&self, path: &str) -> Option<&[f64]> {
        let key = normalize(path).ok()?;
        self.entries.get(&key).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.read(path).is_some()
    }

    /// A leaf or any array below `group` exists.
    pub fn contains_group(&self, group: &str) -> bool {
        let Ok(key) = normalize(group) else {
            return false;
        };
        let prefix = format!("{key}/");
        self.entries.keys().any(|k| *k == key || k.starts_with(&prefix))
    }

    /// Remove `group` and everything below it.  Returns the number of
    /// arrays removed.
    pub fn delete_group(&mut self, group: &str) -> CardiacResult<usize> {
        let key = normalize(group)?;
        let prefix = format!("{key}/");
        let before = self.entries.len();
        self.entries.retain(|k, _| !(*k == key || k.starts_with(&prefix)));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(group = %key, removed, "deleting existing group");
        }
        Ok(removed)
    }

    /// Paths of all arrays below `group`, sorted.
    pub fn paths_under(&self, group: &str) -> Vec<String> {
        let Ok(key) = normalize(group) else {
            return Vec::new();
        };
        let prefix = format!("{key}/");
        self.entries.keys().filter(|k| k.starts_with(&prefix)).cloned().collect()
    }

    /// `<group>/<name>/func_value`, `…/target/<i>`, `…/simulated/<i>` and
    /// `…/weights` when given.
    pub fn write_target_results(
        &mut self,
        group: &str,
        name: &str,
        results: &TargetResults,
        weights: Option<&Array2<f64>>,
    ) -> CardiacResult<()> {
        let base = join(group, name);
        self.write(&join(&base, "func_value"), &results.func_value)?;
        for (i, t) in results.target.iter().enumerate() {
            self.write(&format!("{base}/target/{i}"), t)?;
        }
        for (i, s) in results.simulated.iter().enumerate() {
            self.write(&format!("{base}/simulated/{i}"), s)?;
        }
        if let Some(w) = weights {
            let flat: Vec<f64> = w.iter().copied().collect();
            self.write(&join(&base, "weights"), &flat)?;
        }
        Ok(())
    }

    pub fn write_regularization(&mut self, group: &str, results: &RegularizationResults) -> CardiacResult<()> {
        self.write(&join(group, "regularization/func_value"), &results.func_value)
    }

    pub fn write_history(&mut self, group: &str, history: &OptimizationHistory) -> CardiacResult<()> {
        let base = join(group, "history");
        self.write(&join(&base, "func_values"), &history.func_values)?;
        self.write(&join(&base, "forward_times"), &history.forward_times)?;
        self.write(&join(&base, "backward_times"), &history.backward_times)?;
        self.write(&join(&base, "grad_norm"), &history.grad_norm)?;
        self.write(&join(&base, "grad_norm_scaled"), &history.grad_norm_scaled)?;
        for (i, c) in history.controls.iter().enumerate() {
            self.write(&format!("{base}/controls/{i}"), c)?;
        }
        Ok(())
    }

    pub fn write_control(&mut self, group: &str, control: &[f64]) -> CardiacResult<()> {
        self.write(&join(group, "optimal_control"), control)
    }

    pub fn to_json_string(&self) -> CardiacResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(s: &str) -> CardiacResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> CardiacResult<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, self)?;
        debug!(path = %path.as_ref().display(), arrays = self.len(), "results saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> CardiacResult<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }
}

mod json_values {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Number {
        Finite(f64),
        Special(String),
    }

    impl From<f64> for Number {
        fn from(x: f64) -> Self {
            if x.is_finite() {
                Self::Finite(x)
            } else if x.is_nan() {
                Self::Special("nan".into())
            } else if x > 0.0 {
                Self::Special("inf".into())
            } else {
                Self::Special("-inf".into())
            }
        }
    }

    impl Number {
        fn into_f64(self) -> Result<f64, String> {
            match self {
                Number::Finite(x) => Ok(x),
                Number::Special(s) => match s.as_str() {
                    "nan" => Ok(f64::NAN),
                    "inf" => Ok(f64::INFINITY),
                    "-inf" => Ok(f64::NEG_INFINITY),
                    other => Err(format!("invalid number '{other}'")),
                },
            }
        }
    }

    pub fn serialize<S: Serializer>(map: &BTreeMap<String, Vec<f64>>, s: S) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&str, Vec<Number>> = map
            .iter()
            .map(|(k, v)| (k.as_str(), v.iter().map(|&x| Number::from(x)).collect()))
            .collect();
        encoded.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, Vec<f64>>, D::Error> {
        let raw = BTreeMap::<String, Vec<Number>>::deserialize(d)?;
        raw.into_iter()
            .map(|(k, v)| {
                let values = v
                    .into_iter()
                    .map(Number::into_f64)
                    .collect::<Result<Vec<f64>, String>>()
                    .map_err(D::Error::custom)?;
                Ok((k, values))
            })
            .collect()
    }
}
