//! World state: the free-form state tree plus the ordered plot list.
//!
//! Every mutator both changes the live document and returns the
//! [`DeltaPair`] that round-trips the change, so callers always hold the
//! undo handle.

use crate::delta::{capture, capture_unit, DeltaError, DeltaPair};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for plots.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PlotId(pub Uuid);

impl PlotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PlotId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// One ongoing plot thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plot {
    pub id: PlotId,
    pub title: String,
    pub description: String,
    /// How favorably this plot is going for the player, in `[0, 1]`.
    pub alignment: f64,
    pub created_at_turn: u64,
}

/// Fields for creating a plot.
#[derive(Debug, Clone)]
pub struct NewPlot {
    pub title: String,
    pub description: String,
    pub alignment: f64,
    pub created_at_turn: u64,
}

/// Partial update to a plot; absent fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct PlotUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub alignment: Option<f64>,
}

/// The world-state document: a free-form JSON tree plus the ordered plot
/// sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    pub state: Value,
    pub plots: Vec<Plot>,
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldState {
    /// A fresh, empty world.
    pub fn new() -> Self {
        Self {
            state: Value::Object(Map::new()),
            plots: Vec::new(),
        }
    }

    pub fn get_plot(&self, id: PlotId) -> Option<&Plot> {
        self.plots.iter().find(|p| p.id == id)
    }

    /// Set a value at a slash-separated path inside the state tree,
    /// creating intermediate objects as needed.
    pub fn deep_set(&mut self, path: &str, value: Value) -> Result<DeltaPair, DeltaError> {
        capture_unit(self, |world| {
            set_at_path(&mut world.state, path, value.clone());
        })
    }

    /// Deep-merge a partial state tree into the live one. Explicit
    /// `null` leaves prune the key they target.
    pub fn patch_state(&mut self, partial: &Value) -> Result<DeltaPair, DeltaError> {
        capture_unit(self, |world| {
            merge_into(&mut world.state, partial);
        })
    }

    /// Append a plot. Alignment is clamped into `[0, 1]`.
    pub fn add_plot(&mut self, new: NewPlot) -> Result<(PlotId, DeltaPair), DeltaError> {
        let id = PlotId::new();
        let pair = capture_unit(self, |world| {
            world.plots.push(Plot {
                id,
                title: new.title.clone(),
                description: new.description.clone(),
                alignment: new.alignment.clamp(0.0, 1.0),
                created_at_turn: new.created_at_turn,
            });
        })?;
        Ok((id, pair))
    }

    /// Update a plot in place. Unknown ids return `Ok(None)`.
    pub fn update_plot(
        &mut self,
        id: PlotId,
        update: PlotUpdate,
    ) -> Result<Option<DeltaPair>, DeltaError> {
        let captured = capture(self, |world| {
            let plot = world.plots.iter_mut().find(|p| p.id == id)?;
            if let Some(title) = &update.title {
                plot.title = title.clone();
            }
            if let Some(description) = &update.description {
                plot.description = description.clone();
            }
            if let Some(alignment) = update.alignment {
                plot.alignment = alignment.clamp(0.0, 1.0);
            }
            Some(())
        })?;
        Ok(captured.map(|(_, pair)| pair))
    }

    /// Remove a plot. Unknown ids return `Ok(None)`.
    pub fn remove_plot(&mut self, id: PlotId) -> Result<Option<DeltaPair>, DeltaError> {
        let captured = capture(self, |world| {
            let position = world.plots.iter().position(|p| p.id == id)?;
            world.plots.remove(position);
            Some(())
        })?;
        Ok(captured.map(|(_, pair)| pair))
    }
}

/// Set `value` at a slash path like `player/hp`, overwriting whatever is
/// in the way with intermediate objects.
fn set_at_path(state: &mut Value, path: &str, value: Value) {
    let tokens: Vec<&str> = path.split('/').filter(|t| !t.is_empty()).collect();
    if tokens.is_empty() {
        *state = value;
        return;
    }

    let mut cursor = state;
    for token in &tokens[..tokens.len() - 1] {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        cursor = cursor
            .as_object_mut()
            .expect("just coerced to object")
            .entry(token.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !cursor.is_object() {
        *cursor = Value::Object(Map::new());
    }
    if let Some(map) = cursor.as_object_mut() {
        map.insert(tokens[tokens.len() - 1].to_string(), value);
    }
}

/// Deep merge: objects merge recursively, `null` prunes, everything
/// else replaces.
fn merge_into(target: &mut Value, partial: &Value) {
    let Value::Object(patch) = partial else {
        *target = partial.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let map = target.as_object_mut().expect("just coerced to object");
    for (key, patch_value) in patch {
        if patch_value.is_null() {
            map.remove(key);
        } else if let Some(slot) = map.get_mut(key) {
            merge_into(slot, patch_value);
        } else {
            map.insert(key.clone(), patch_value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::apply_to;
    use serde_json::json;

    #[test]
    fn deep_set_creates_intermediate_objects() {
        let mut world = WorldState::new();
        world.deep_set("player/stats/hp", json!(80)).unwrap();
        assert_eq!(world.state["player"]["stats"]["hp"], 80);
    }

    #[test]
    fn patch_state_merges_and_null_prunes() {
        let mut world = WorldState::new();
        world
            .deep_set("player", json!({"hp": 80, "mana": 20}))
            .unwrap();

        world
            .patch_state(&json!({"player": {"hp": 100, "mana": null}, "weather": "storm"}))
            .unwrap();

        assert_eq!(world.state["player"]["hp"], 100);
        assert!(world.state["player"].get("mana").is_none());
        assert_eq!(world.state["weather"], "storm");
    }

    #[test]
    fn plot_alignment_is_clamped() {
        let mut world = WorldState::new();
        let (id, _) = world
            .add_plot(NewPlot {
                title: "Main Quest".into(),
                description: "Defeat the dragon".into(),
                alignment: 1.7,
                created_at_turn: 1,
            })
            .unwrap();
        assert_eq!(world.get_plot(id).unwrap().alignment, 1.0);

        world
            .update_plot(
                id,
                PlotUpdate {
                    alignment: Some(-0.5),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(world.get_plot(id).unwrap().alignment, 0.0);
    }

    #[test]
    fn unknown_plot_ids_are_none_without_mutation() {
        let mut world = WorldState::new();
        let before = world.clone();

        assert!(world
            .update_plot(PlotId::new(), PlotUpdate::default())
            .unwrap()
            .is_none());
        assert!(world.remove_plot(PlotId::new()).unwrap().is_none());
        assert_eq!(world, before);
    }

    #[test]
    fn mutator_sequence_reverts_to_initial_bit_for_bit() {
        let mut world = WorldState::new();
        world.deep_set("player/hp", json!(80)).unwrap();
        let initial = serde_json::to_value(&world).unwrap();

        let d1 = world.deep_set("player/hp", json!(100)).unwrap();
        let (id, d2) = world
            .add_plot(NewPlot {
                title: "Main Quest".into(),
                description: "Defeat the dragon".into(),
                alignment: 0.1,
                created_at_turn: 1,
            })
            .unwrap();
        let d3 = world
            .update_plot(
                id,
                PlotUpdate {
                    alignment: Some(0.15),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        let d4 = world.remove_plot(id).unwrap().unwrap();

        let mut current = world.clone();
        for pair in [&d4, &d3, &d2, &d1] {
            current = apply_to(&current, &pair.revert).unwrap();
        }
        assert_eq!(serde_json::to_value(&current).unwrap(), initial);
    }
}
