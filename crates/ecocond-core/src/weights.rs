//! Constrained weight redistribution.
//!
//! A [`WeightAllocator`] keeps a group of weights summing to 1. Setting one
//! weight marks it as overridden; the remainder `1 - Σ overridden` is shared
//! equally by the items nobody has touched. When the overridden weights
//! would exceed 1, the item being set is clamped to what is left.
//!
//! [`WeightTree`] applies the same rule twice: to the layers inside each
//! ecosystem state and to the states themselves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::state::EcosystemState;

/// Sums within this distance of 1 are treated as 1.
pub const WEIGHT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightItem {
    pub label: String,
    pub weight: f64,
    pub overridden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightAllocator {
    items: Vec<WeightItem>,
}

impl WeightAllocator {
    /// Equal weights `1/n` over the given labels.
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(Error::Validation("a weight group needs at least one item".into()));
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(Error::Validation(format!("duplicate weight label '{label}'")));
            }
        }
        let share = 1.0 / labels.len() as f64;
        Ok(Self {
            items: labels
                .into_iter()
                .map(|label| WeightItem {
                    label,
                    weight: share,
                    overridden: false,
                })
                .collect(),
        })
    }

    pub fn items(&self) -> &[WeightItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn weight(&self, label: &str) -> Option<f64> {
        self.items.iter().find(|i| i.label == label).map(|i| i.weight)
    }

    pub fn total(&self) -> f64 {
        self.items.iter().map(|i| i.weight).sum()
    }

    /// Set `label` to `value`, then rebalance the untouched items.
    /// Returns the resulting distribution.
    pub fn set_weight(&mut self, label: &str, value: f64) -> Result<&[WeightItem]> {
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::Validation(format!(
                "weight for '{label}' must lie in [0, 1], got {value}"
            )));
        }
        let idx = self
            .items
            .iter()
            .position(|i| i.label == label)
            .ok_or_else(|| Error::Validation(format!("unknown weight label '{label}'")))?;

        self.items[idx].weight = value;
        self.items[idx].overridden = true;

        let mut overridden_sum: f64 = self
            .items
            .iter()
            .filter(|i| i.overridden)
            .map(|i| i.weight)
            .sum();

        if overridden_sum > 1.0 + WEIGHT_EPSILON {
            let others = overridden_sum - value;
            let clamped = (1.0 - others).max(0.0);
            debug!(label, requested = value, clamped, "weight clamped");
            self.items[idx].weight = clamped;
            overridden_sum = others + clamped;
        }

        let free = self.items.iter().filter(|i| !i.overridden).count();
        if free > 0 {
            let share = (1.0 - overridden_sum).max(0.0) / free as f64;
            for item in self.items.iter_mut().filter(|i| !i.overridden) {
                item.weight = share;
            }
        }

        Ok(&self.items)
    }

    /// Drop every override and return to equal weights.
    pub fn reset(&mut self) {
        let share = 1.0 / self.items.len().max(1) as f64;
        for item in &mut self.items {
            item.weight = share;
            item.overridden = false;
        }
    }
}

/// Weight overrides as read from a run file. States and layers (by short
/// name) are applied in key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightOverrides {
    #[serde(default)]
    pub states: BTreeMap<EcosystemState, f64>,
    #[serde(default)]
    pub layers: BTreeMap<String, f64>,
}

/// Two-level weights: layers within each present state, and the states.
#[derive(Debug, Clone)]
pub struct WeightTree {
    states: WeightAllocator,
    layers: BTreeMap<EcosystemState, WeightAllocator>,
}

impl WeightTree {
    /// Build from (state, layer label) pairs. Only states that receive at
    /// least one layer take part.
    pub fn from_assignments<'a, I>(assignments: I) -> Result<Self>
    where
        I: IntoIterator<Item = (EcosystemState, &'a str)>,
    {
        let mut grouped: BTreeMap<EcosystemState, Vec<String>> = BTreeMap::new();
        for (state, label) in assignments {
            grouped.entry(state).or_default().push(label.to_string());
        }
        if grouped.is_empty() {
            return Err(Error::Validation("no layers assigned to any ecosystem state".into()));
        }

        let states = WeightAllocator::new(grouped.keys().map(|s| s.as_str()))?;
        let layers = grouped
            .into_iter()
            .map(|(state, labels)| Ok((state, WeightAllocator::new(labels)?)))
            .collect::<Result<_>>()?;

        Ok(Self { states, layers })
    }

    /// Present states in canonical order.
    pub fn states(&self) -> impl Iterator<Item = EcosystemState> + '_ {
        self.layers.keys().copied()
    }

    pub fn state_weights(&self) -> &WeightAllocator {
        &self.states
    }

    pub fn state_weight(&self, state: EcosystemState) -> Option<f64> {
        self.states.weight(state.as_str())
    }

    pub fn layer_weights(&self, state: EcosystemState) -> Option<&WeightAllocator> {
        self.layers.get(&state)
    }

    pub fn set_state_weight(&mut self, state: EcosystemState, value: f64) -> Result<()> {
        if !self.layers.contains_key(&state) {
            return Err(Error::Validation(format!("state '{state}' has no layers")));
        }
        self.states.set_weight(state.as_str(), value)?;
        Ok(())
    }

    pub fn set_layer_weight(&mut self, state: EcosystemState, label: &str, value: f64) -> Result<()> {
        let group = self
            .layers
            .get_mut(&state)
            .ok_or_else(|| Error::Validation(format!("state '{state}' has no layers")))?;
        group.set_weight(label, value)?;
        Ok(())
    }

    /// Find the state holding a layer label.
    pub fn state_of(&self, label: &str) -> Option<EcosystemState> {
        self.layers
            .iter()
            .find(|(_, g)| g.weight(label).is_some())
            .map(|(s, _)| *s)
    }

    /// Apply run-file overrides. A clamped override is logged, not rejected.
    pub fn apply(&mut self, overrides: &WeightOverrides) -> Result<()> {
        for (label, &value) in &overrides.layers {
            let state = self
                .state_of(label)
                .ok_or_else(|| Error::Validation(format!("unknown layer '{label}' in weights")))?;
            self.set_layer_weight(state, label, value)?;
            if let Some(applied) = self.layers[&state].weight(label) {
                if (applied - value).abs() > WEIGHT_EPSILON {
                    warn!(layer = %label, requested = value, applied, "layer weight clamped");
                }
            }
        }
        for (&state, &value) in &overrides.states {
            self.set_state_weight(state, value)?;
            if let Some(applied) = self.state_weight(state) {
                if (applied - value).abs() > WEIGHT_EPSILON {
                    warn!(%state, requested = value, applied, "state weight clamped");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn weights(a: &WeightAllocator) -> Vec<f64> {
        a.items().iter().map(|i| i.weight).collect()
    }

    #[test]
    fn starts_with_equal_shares() {
        let a = WeightAllocator::new(["a", "b", "c", "d"]).unwrap();
        for w in weights(&a) {
            assert_abs_diff_eq!(w, 0.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn override_redistributes_remainder() {
        let mut a = WeightAllocator::new(["a", "b", "c"]).unwrap();
        a.set_weight("a", 0.9).unwrap();
        let w = weights(&a);
        assert_abs_diff_eq!(w[0], 0.9, epsilon = 1e-12);
        assert_abs_diff_eq!(w[1], 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(w[2], 0.05, epsilon = 1e-12);
    }

    #[test]
    fn second_override_is_clamped_to_what_is_left() {
        let mut a = WeightAllocator::new(["a", "b", "c"]).unwrap();
        a.set_weight("a", 0.9).unwrap();
        a.set_weight("b", 0.9).unwrap();
        let w = weights(&a);
        assert_abs_diff_eq!(w[0], 0.9, epsilon = 1e-9);
        assert_abs_diff_eq!(w[1], 0.1, epsilon = 1e-9);
        assert_abs_diff_eq!(w[2], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(a.total(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn out_of_range_and_unknown_labels_are_rejected() {
        let mut a = WeightAllocator::new(["a", "b"]).unwrap();
        assert!(matches!(a.set_weight("a", 1.5), Err(Error::Validation(_))));
        assert!(matches!(a.set_weight("a", -0.1), Err(Error::Validation(_))));
        assert!(matches!(a.set_weight("z", 0.5), Err(Error::Validation(_))));
    }

    #[test]
    fn duplicate_and_empty_groups_are_rejected() {
        assert!(WeightAllocator::new(["a", "a"]).is_err());
        assert!(WeightAllocator::new(Vec::<String>::new()).is_err());
    }

    #[test]
    fn reset_restores_equal_shares() {
        let mut a = WeightAllocator::new(["a", "b"]).unwrap();
        a.set_weight("a", 0.8).unwrap();
        a.reset();
        assert!(a.items().iter().all(|i| !i.overridden));
        assert_abs_diff_eq!(a.weight("a").unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn random_override_sequences_keep_invariants() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let n = rng.gen_range(2..7);
            let labels: Vec<String> = (0..n).map(|i| format!("l{i}")).collect();
            let mut a = WeightAllocator::new(labels.clone()).unwrap();
            for _ in 0..rng.gen_range(1..10) {
                let label = &labels[rng.gen_range(0..n)];
                a.set_weight(label, rng.gen_range(0.0..=1.0)).unwrap();

                assert!(a.items().iter().all(|i| (0.0..=1.0 + 1e-12).contains(&i.weight)));
                let overridden: f64 = a
                    .items()
                    .iter()
                    .filter(|i| i.overridden)
                    .map(|i| i.weight)
                    .sum();
                assert!(overridden <= 1.0 + 1e-9);
                if a.items().iter().any(|i| !i.overridden) {
                    assert_abs_diff_eq!(a.total(), 1.0, epsilon = 1e-9);
                }
            }
        }
    }

    #[test]
    fn tree_only_contains_present_states() {
        let tree = WeightTree::from_assignments([
            (EcosystemState::Chemical, "ph"),
            (EcosystemState::Physical, "soil"),
            (EcosystemState::Physical, "slope"),
        ])
        .unwrap();
        let states: Vec<_> = tree.states().collect();
        assert_eq!(states, vec![EcosystemState::Physical, EcosystemState::Chemical]);
        assert_abs_diff_eq!(tree.state_weight(EcosystemState::Physical).unwrap(), 0.5);
        assert!(tree.state_weight(EcosystemState::Landscape).is_none());
        let phys = tree.layer_weights(EcosystemState::Physical).unwrap();
        assert_abs_diff_eq!(phys.weight("slope").unwrap(), 0.5);
    }

    #[test]
    fn tree_applies_overrides_at_both_levels() {
        let mut tree = WeightTree::from_assignments([
            (EcosystemState::Physical, "soil"),
            (EcosystemState::Physical, "slope"),
            (EcosystemState::Functional, "npp"),
        ])
        .unwrap();
        let mut overrides = WeightOverrides::default();
        overrides.layers.insert("soil".into(), 0.7);
        overrides.states.insert(EcosystemState::Functional, 0.25);
        tree.apply(&overrides).unwrap();

        let phys = tree.layer_weights(EcosystemState::Physical).unwrap();
        assert_abs_diff_eq!(phys.weight("soil").unwrap(), 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(phys.weight("slope").unwrap(), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(tree.state_weight(EcosystemState::Physical).unwrap(), 0.75, epsilon = 1e-12);
    }

    #[test]
    fn tree_rejects_unknown_layer_override() {
        let mut tree = WeightTree::from_assignments([(EcosystemState::Physical, "soil")]).unwrap();
        let mut overrides = WeightOverrides::default();
        overrides.layers.insert("nope".into(), 0.5);
        assert!(tree.apply(&overrides).is_err());
    }
}
