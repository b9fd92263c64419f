//! Control fields updated by the optimiser between forward solves.
//!
//! A control lives in one of three spaces:
//!
//!   R_0       one scalar for the whole domain
//!   CG_1      one value per mesh node
//!   regional  one coefficient per anatomical region
//!
//! A regional control is stored explicitly as the element → region map and
//! one coefficient per distinct region id; its value on an element is
//! Σ_k c_k · 1[region(e) = id_k].

use crate::material::MaterialModel;
use crate::types::{CardiacError, CardiacResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ─────────────────────────────────────────────────────────────
//  Region merging
// ─────────────────────────────────────────────────────────────

/// Merge groups of region ids.  `groups` reads like `"1,2:3,4"`: groups are
/// separated by `:`, ids inside a group by `,`, and every id in a group is
/// relabelled to the smallest id of the group.
pub fn merge_regions(element_regions: &[usize], groups: &str) -> CardiacResult<Vec<usize>> {
    let mut relabel: BTreeMap<usize, usize> = BTreeMap::new();
    for group in groups.split(':').map(str::trim).filter(|g| !g.is_empty()) {
        let ids = group
            .split(',')
            .map(|s| {
                s.trim().parse::<usize>().map_err(|_| {
                    CardiacError::Configuration(format!(
                        "cannot parse region id '{s}' in merge groups '{groups}'"
                    ))
                })
            })
            .collect::<CardiacResult<Vec<usize>>>()?;
        let target = ids.iter().copied().min().unwrap_or_default();
        for id in ids {
            relabel.insert(id, target);
        }
    }
    Ok(element_regions
        .iter()
        .map(|r| relabel.get(r).copied().unwrap_or(*r))
        .collect())
}

// ─────────────────────────────────────────────────────────────
//  Regional parameter
// ─────────────────────────────────────────────────────────────

/// Piecewise-constant field over a region partition.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionalParameter {
    element_regions: Vec<usize>,
    region_ids: Vec<usize>,
    coefficients: Vec<f64>,
}

impl RegionalParameter {
    /// Build from the region id of every element.  The number of
    /// coefficients equals the number of distinct ids.
    pub fn new(element_regions: Vec<usize>) -> CardiacResult<Self> {
        if element_regions.is_empty() {
            return Err(CardiacError::Shape("region map has no elements".into()));
        }
        let mut region_ids = element_regions.clone();
        region_ids.sort_unstable();
        region_ids.dedup();
        let coefficients = vec![0.0; region_ids.len()];
        Ok(Self { element_regions, region_ids, coefficients })
    }

    /// Like [`new`](Self::new) after merging region groups.
    pub fn with_merged_regions(element_regions: &[usize], groups: &str) -> CardiacResult<Self> {
        Self::new(merge_regions(element_regions, groups)?)
    }

    pub fn num_regions(&self) -> usize {
        self.region_ids.len()
    }

    pub fn num_elements(&self) -> usize {
        self.element_regions.len()
    }

    /// Sorted distinct region ids; coefficient `k` belongs to `region_ids()[k]`.
    pub fn region_ids(&self) -> &[usize] {
        &self.region_ids
    }

    pub fn element_regions(&self) -> &[usize] {
        &self.element_regions
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn set_coefficients(&mut self, values: &[f64]) -> CardiacResult<()> {
        if values.len() != self.coefficients.len() {
            return Err(CardiacError::Shape(format!(
                "{} coefficients for {} regions",
                values.len(),
                self.coefficients.len()
            )));
        }
        self.coefficients.copy_from_slice(values);
        Ok(())
    }

    /// Same value in every region.
    pub fn fill(&mut self, value: f64) {
        self.coefficients.iter_mut().for_each(|c| *c = value);
    }

    fn region_index(&self, region: usize) -> Option<usize> {
        self.region_ids.binary_search(&region).ok()
    }

    /// Indicator of region `k` over the elements.
    pub fn indicator(&self, k: usize) -> CardiacResult<Vec<f64>> {
        let id = *self.region_ids.get(k).ok_or_else(|| {
            CardiacError::Shape(format!("region index {k} out of {} regions", self.num_regions()))
        })?;
        Ok(self
            .element_regions
            .iter()
            .map(|&r| if r == id { 1.0 } else { 0.0 })
            .collect())
    }

    /// Value of the field on one element.
    pub fn value_at(&self, element: usize) -> CardiacResult<f64> {
        let region = *self.element_regions.get(element).ok_or_else(|| {
            CardiacError::Shape(format!("element {element} out of {}", self.num_elements()))
        })?;
        // Every element region is in `region_ids` by construction.
        Ok(self.region_index(region).map_or(0.0, |k| self.coefficients[k]))
    }

    /// Value of the field on every element.
    pub fn field(&self) -> Vec<f64> {
        self.element_regions
            .iter()
            .map(|&r| self.region_index(r).map_or(0.0, |k| self.coefficients[k]))
            .collect()
    }

    /// Sum an element-wise gradient into one entry per region (transpose of
    /// [`field`](Self::field)).
    pub fn restrict(&self, element_values: &[f64]) -> CardiacResult<Vec<f64>> {
        if element_values.len() != self.num_elements() {
            return Err(CardiacError::Shape(format!(
                "{} element values for {} elements",
                element_values.len(),
                self.num_elements()
            )));
        }
        let mut out = vec![0.0; self.num_regions()];
        for (&r, &v) in self.element_regions.iter().zip(element_values) {
            if let Some(k) = self.region_index(r) {
                out[k] += v;
            }
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────
//  Control spaces and fields
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlSpace {
    #[serde(rename = "R_0")]
    Real,
    #[serde(rename = "CG_1")]
    Nodal,
    #[serde(rename = "regional")]
    Regional,
}

impl ControlSpace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Real => "R_0",
            Self::Nodal => "CG_1",
            Self::Regional => "regional",
        }
    }
}

impl fmt::Display for ControlSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlSpace {
    type Err = CardiacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R_0" => Ok(Self::Real),
            "CG_1" => Ok(Self::Nodal),
            "regional" => Ok(Self::Regional),
            other => Err(CardiacError::Configuration(format!(
                "unknown control space '{other}'"
            ))),
        }
    }
}

/// A control in one of the supported spaces.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlField {
    Scalar(f64),
    Nodal(Vec<f64>),
    Regional(RegionalParameter),
}

impl ControlField {
    pub fn space(&self) -> ControlSpace {
        match self {
            Self::Scalar(_) => ControlSpace::Real,
            Self::Nodal(_) => ControlSpace::Nodal,
            Self::Regional(_) => ControlSpace::Regional,
        }
    }

    /// Number of optimisation degrees of freedom.
    pub fn len(&self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Nodal(v) => v.len(),
            Self::Regional(r) => r.num_regions(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Degrees of freedom as a flat vector.
    pub fn values(&self) -> Vec<f64> {
        match self {
            Self::Scalar(v) => vec![*v],
            Self::Nodal(v) => v.clone(),
            Self::Regional(r) => r.coefficients().to_vec(),
        }
    }

    pub fn set_values(&mut self, values: &[f64]) -> CardiacResult<()> {
        if values.len() != self.len() {
            return Err(CardiacError::Shape(format!(
                "{} values for a {} control with {} degrees of freedom",
                values.len(),
                self.space(),
                self.len()
            )));
        }
        match self {
            Self::Scalar(v) => *v = values[0],
            Self::Nodal(v) => v.copy_from_slice(values),
            Self::Regional(r) => r.set_coefficients(values)?,
        }
        Ok(())
    }

    /// Value on entity `i`: a node for `CG_1`, an element for `regional`,
    /// ignored for `R_0`.
    pub fn value_at(&self, i: usize) -> CardiacResult<f64> {
        match self {
            Self::Scalar(v) => Ok(*v),
            Self::Nodal(v) => v.get(i).copied().ok_or_else(|| {
                CardiacError::Shape(format!("node {i} out of {}", v.len()))
            }),
            Self::Regional(r) => r.value_at(i),
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Packing several named controls into one θ
// ─────────────────────────────────────────────────────────────

/// Ordered set of named controls optimised together.  θ is the
/// concatenation of their degrees of freedom in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterLayout {
    entries: Vec<(String, ControlField)>,
}

impl ParameterLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, field: ControlField) -> CardiacResult<()> {
        let name = name.into();
        if self.entries.iter().any(|(n, _)| *n == name) {
            return Err(CardiacError::Configuration(format!(
                "control '{name}' is declared twice"
            )));
        }
        self.entries.push((name, field));
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn field(&self, name: &str) -> Option<&ControlField> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Total length of θ.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, f)| f.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pack(&self) -> Vec<f64> {
        let mut theta = Vec::with_capacity(self.len());
        for (_, field) in &self.entries {
            theta.extend(field.values());
        }
        theta
    }

    pub fn unpack(&mut self, theta: &[f64]) -> CardiacResult<()> {
        if theta.len() != self.len() {
            return Err(CardiacError::Shape(format!(
                "θ has {} entries, layout expects {}",
                theta.len(),
                self.len()
            )));
        }
        let mut offset = 0;
        for (_, field) in &mut self.entries {
            let n = field.len();
            field.set_values(&theta[offset..offset + n])?;
            offset += n;
        }
        Ok(())
    }

    /// Material model with every control that names one of its parameters
    /// evaluated on entity `i`.  Controls that are not material parameters
    /// (the activation, say) are left out.
    pub fn material_at(&self, base: &MaterialModel, i: usize) -> CardiacResult<MaterialModel> {
        let mut model = base.clone();
        let names = base.law().parameter_names();
        for (name, field) in &self.entries {
            if names.contains(&name.as_str()) {
                model.set_parameter(name, field.value_at(i)?)?;
            }
        }
        Ok(model)
    }
}
