//! The delta engine: inverse-computable JSON-pointer patch pairs.
//!
//! Every mutation to world state, the memory set, or the story tree is
//! expressed as a [`DeltaPair`]: an `apply` op sequence and the `revert`
//! sequence that undoes it. Pairs are produced by diffing a document
//! snapshot against the mutated copy, so any mutator automatically
//! yields its own inverse.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from diffing or applying patches.
#[derive(Debug, Error)]
pub enum DeltaError {
    /// A `remove`, `replace`, or `move` named a path that does not
    /// exist.
    #[error("path '{0}' not found")]
    PathNotFound(String),

    /// A structurally invalid operation (bad pointer syntax, index out
    /// of bounds, removal of the whole document).
    #[error("invalid patch operation: {0}")]
    InvalidOp(String),

    /// The document could not round-trip through JSON.
    #[error("document serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One JSON-pointer patch operation, wire-compatible with RFC 6902.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
}

impl PatchOp {
    /// The first pointer token of the op's target path. `Move` is rooted
    /// where its destination is; both of its ends always share a root
    /// here because pairs are produced per document.
    pub fn root_token(&self) -> &str {
        let path = match self {
            PatchOp::Add { path, .. }
            | PatchOp::Remove { path }
            | PatchOp::Replace { path, .. }
            | PatchOp::Move { path, .. } => path,
        };
        path.strip_prefix('/')
            .map(|rest| rest.split('/').next().unwrap_or(""))
            .unwrap_or("")
    }
}

/// An inverse-computable patch pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaPair {
    pub apply: Vec<PatchOp>,
    pub revert: Vec<PatchOp>,
}

impl DeltaPair {
    pub fn is_empty(&self) -> bool {
        self.apply.is_empty() && self.revert.is_empty()
    }

    /// The pair that undoes this one.
    pub fn inverted(&self) -> DeltaPair {
        DeltaPair {
            apply: self.revert.clone(),
            revert: self.apply.clone(),
        }
    }

    /// Sequence `other` after `self`: applies run in order, reverts in
    /// reverse order.
    pub fn compose(mut self, other: DeltaPair) -> DeltaPair {
        self.apply.extend(other.apply);
        let mut revert = other.revert;
        revert.extend(self.revert);
        self.revert = revert;
        self
    }
}

// ============================================================================
// Diff
// ============================================================================

/// Produce ops transforming `a` into `b`.
///
/// Objects are diffed as maps; arrays positionally, except that a pure
/// permutation of the same elements is expressed as `move` ops so that
/// order restoration round-trips exactly.
pub fn diff(a: &Value, b: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_values(a, b, "", &mut ops);
    ops
}

fn diff_values(a: &Value, b: &Value, path: &str, ops: &mut Vec<PatchOp>) {
    if a == b {
        return;
    }
    match (a, b) {
        (Value::Object(ma), Value::Object(mb)) => {
            for (key, va) in ma {
                match mb.get(key) {
                    Some(vb) => diff_values(va, vb, &child(path, key), ops),
                    None => ops.push(PatchOp::Remove {
                        path: child(path, key),
                    }),
                }
            }
            for (key, vb) in mb {
                if !ma.contains_key(key) {
                    ops.push(PatchOp::Add {
                        path: child(path, key),
                        value: vb.clone(),
                    });
                }
            }
        }
        (Value::Array(xs), Value::Array(ys)) => diff_arrays(xs, ys, path, ops),
        _ => ops.push(PatchOp::Replace {
            path: path.to_string(),
            value: b.clone(),
        }),
    }
}

fn diff_arrays(xs: &[Value], ys: &[Value], path: &str, ops: &mut Vec<PatchOp>) {
    if xs.len() == ys.len() && is_permutation(xs, ys) {
        emit_moves(xs, ys, path, ops);
        return;
    }

    let overlap = xs.len().min(ys.len());
    for (i, (x, y)) in xs.iter().zip(ys).take(overlap).enumerate() {
        diff_values(x, y, &index_child(path, i), ops);
    }
    if ys.len() > xs.len() {
        for (i, y) in ys.iter().enumerate().skip(xs.len()) {
            ops.push(PatchOp::Add {
                path: index_child(path, i),
                value: y.clone(),
            });
        }
    } else {
        // Shrink from the tail so earlier indices stay valid.
        for i in (ys.len()..xs.len()).rev() {
            ops.push(PatchOp::Remove {
                path: index_child(path, i),
            });
        }
    }
}

/// Equal multisets of elements (order-insensitive).
fn is_permutation(xs: &[Value], ys: &[Value]) -> bool {
    if xs.len() != ys.len() {
        return false;
    }
    let mut used = vec![false; ys.len()];
    'outer: for x in xs {
        for (i, y) in ys.iter().enumerate() {
            if !used[i] && x == y {
                used[i] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

/// Express a permutation as `move` ops by simulating them.
fn emit_moves(xs: &[Value], ys: &[Value], path: &str, ops: &mut Vec<PatchOp>) {
    let mut current: Vec<Value> = xs.to_vec();
    for i in 0..ys.len() {
        if current[i] == ys[i] {
            continue;
        }
        // The permutation check guarantees the element is ahead.
        if let Some(offset) = current[i + 1..].iter().position(|v| v == &ys[i]) {
            let j = i + 1 + offset;
            let value = current.remove(j);
            current.insert(i, value);
            ops.push(PatchOp::Move {
                from: index_child(path, j),
                path: index_child(path, i),
            });
        }
    }
}

fn child(path: &str, key: &str) -> String {
    format!("{path}/{}", escape(key))
}

fn index_child(path: &str, index: usize) -> String {
    format!("{path}/{index}")
}

fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

// ============================================================================
// Apply
// ============================================================================

/// Apply an op sequence to a document in place, with strict validation.
pub fn apply_patch(doc: &mut Value, ops: &[PatchOp]) -> Result<(), DeltaError> {
    for op in ops {
        apply_op(doc, op)?;
    }
    Ok(())
}

/// Apply an op sequence to a typed document, returning the new value.
pub fn apply_to<T>(doc: &T, ops: &[PatchOp]) -> Result<T, DeltaError>
where
    T: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(doc)?;
    apply_patch(&mut value, ops)?;
    Ok(serde_json::from_value(value)?)
}

fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), DeltaError> {
    match op {
        PatchOp::Add { path, value } => add(doc, path, value.clone()),
        PatchOp::Remove { path } => remove(doc, path).map(|_| ()),
        PatchOp::Replace { path, value } => replace(doc, path, value.clone()),
        PatchOp::Move { from, path } => {
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
    }
}

fn add(doc: &mut Value, path: &str, value: Value) -> Result<(), DeltaError> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent, token) = resolve_parent(doc, path)?;
    match parent {
        Value::Object(map) => {
            map.insert(token, value);
            Ok(())
        }
        Value::Array(items) => {
            if token == "-" {
                items.push(value);
                return Ok(());
            }
            let index = parse_index(&token, path)?;
            if index > items.len() {
                return Err(DeltaError::InvalidOp(format!(
                    "add index {index} out of bounds at '{path}'"
                )));
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(DeltaError::InvalidOp(format!(
            "cannot add into a scalar at '{path}'"
        ))),
    }
}

fn remove(doc: &mut Value, path: &str) -> Result<Value, DeltaError> {
    if path.is_empty() {
        return Err(DeltaError::InvalidOp(
            "cannot remove the whole document".into(),
        ));
    }
    let (parent, token) = resolve_parent(doc, path)?;
    match parent {
        Value::Object(map) => map
            .remove(&token)
            .ok_or_else(|| DeltaError::PathNotFound(path.to_string())),
        Value::Array(items) => {
            let index = parse_index(&token, path)?;
            if index >= items.len() {
                return Err(DeltaError::PathNotFound(path.to_string()));
            }
            Ok(items.remove(index))
        }
        _ => Err(DeltaError::PathNotFound(path.to_string())),
    }
}

fn replace(doc: &mut Value, path: &str, value: Value) -> Result<(), DeltaError> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent, token) = resolve_parent(doc, path)?;
    match parent {
        Value::Object(map) => match map.get_mut(&token) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(DeltaError::PathNotFound(path.to_string())),
        },
        Value::Array(items) => {
            let index = parse_index(&token, path)?;
            match items.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(DeltaError::PathNotFound(path.to_string())),
            }
        }
        _ => Err(DeltaError::PathNotFound(path.to_string())),
    }
}

/// Walk to the parent of the pointed-at location; returns the parent and
/// the final (unescaped) token.
fn resolve_parent<'a>(doc: &'a mut Value, path: &str) -> Result<(&'a mut Value, String), DeltaError> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(DeltaError::InvalidOp(format!(
            "pointer '{path}' must start with '/'"
        )));
    };
    let tokens: Vec<String> = rest.split('/').map(unescape).collect();
    let (last, ancestors) = tokens
        .split_last()
        .ok_or_else(|| DeltaError::InvalidOp(format!("empty pointer '{path}'")))?;

    let mut cursor = doc;
    for token in ancestors {
        cursor = match cursor {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| DeltaError::PathNotFound(path.to_string()))?,
            Value::Array(items) => {
                let index = parse_index(token, path)?;
                items
                    .get_mut(index)
                    .ok_or_else(|| DeltaError::PathNotFound(path.to_string()))?
            }
            _ => return Err(DeltaError::PathNotFound(path.to_string())),
        };
    }
    Ok((cursor, last.clone()))
}

fn parse_index(token: &str, path: &str) -> Result<usize, DeltaError> {
    token
        .parse::<usize>()
        .map_err(|_| DeltaError::InvalidOp(format!("'{token}' is not an array index in '{path}'")))
}

// ============================================================================
// Capture
// ============================================================================

/// Run a fallible mutator under the snapshot-diff-commit protocol.
///
/// The mutator runs against a deep copy; returning `None` leaves the
/// live document untouched and yields `Ok(None)`. Otherwise the live
/// document adopts the mutated copy and the pair is the sole handle to
/// the mutation.
pub fn capture<T, R, F>(doc: &mut T, mutator: F) -> Result<Option<(R, DeltaPair)>, DeltaError>
where
    T: Serialize + Clone,
    F: FnOnce(&mut T) -> Option<R>,
{
    let before = serde_json::to_value(&*doc)?;
    let mut working = doc.clone();
    match mutator(&mut working) {
        None => Ok(None),
        Some(result) => {
            let after = serde_json::to_value(&working)?;
            let pair = DeltaPair {
                apply: diff(&before, &after),
                revert: diff(&after, &before),
            };
            *doc = working;
            Ok(Some((result, pair)))
        }
    }
}

/// [`capture`] for mutators that cannot fail.
pub fn capture_unit<T, F>(doc: &mut T, mutator: F) -> Result<DeltaPair, DeltaError>
where
    T: Serialize + Clone,
    F: FnOnce(&mut T),
{
    let captured = capture(doc, |working| {
        mutator(working);
        Some(())
    })?;
    Ok(captured.map(|(_, pair)| pair).unwrap_or_default())
}

/// Split a game-document op list into the memory-subtree ops and the
/// rest. Sound because the `memories` subtree is disjoint from `state`
/// and `plots`.
pub fn partition_by_root(ops: &[PatchOp], root: &str) -> (Vec<PatchOp>, Vec<PatchOp>) {
    ops.iter()
        .cloned()
        .partition(|op| op.root_token() == root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(a: Value, b: Value) {
        let forward = diff(&a, &b);
        let backward = diff(&b, &a);

        let mut doc = a.clone();
        apply_patch(&mut doc, &forward).unwrap();
        assert_eq!(doc, b, "forward patch");

        apply_patch(&mut doc, &backward).unwrap();
        assert_eq!(doc, a, "backward patch");
    }

    #[test]
    fn object_add_remove_replace() {
        round_trip(
            json!({"hp": 80, "name": "Ser Aldric"}),
            json!({"hp": 100, "mana": 30}),
        );
    }

    #[test]
    fn nested_changes_touch_only_their_subtrees() {
        let a = json!({"player": {"hp": 80, "inventory": ["sword"]}, "weather": "rain"});
        let b = json!({"player": {"hp": 100, "inventory": ["sword"]}, "weather": "rain"});
        let ops = diff(&a, &b);
        assert_eq!(
            ops,
            vec![PatchOp::Replace {
                path: "/player/hp".into(),
                value: json!(100)
            }]
        );
    }

    #[test]
    fn array_growth_and_shrink() {
        round_trip(json!([1, 2, 3]), json!([1, 2, 3, 4, 5]));
        round_trip(json!([1, 2, 3, 4, 5]), json!([1]));
        round_trip(json!({"items": []}), json!({"items": [{"id": 1}]}));
    }

    #[test]
    fn permutations_become_moves() {
        let a = json!(["a", "b", "c", "d"]);
        let b = json!(["d", "a", "c", "b"]);
        let ops = diff(&a, &b);
        assert!(
            ops.iter().all(|op| matches!(op, PatchOp::Move { .. })),
            "expected only moves, got {ops:?}"
        );
        round_trip(a, b);
    }

    #[test]
    fn escaped_keys_round_trip() {
        round_trip(
            json!({"a/b": 1, "c~d": {"x": 2}}),
            json!({"a/b": 9, "c~d": {"x": 3}}),
        );
    }

    #[test]
    fn strict_remove_of_missing_path_fails() {
        let mut doc = json!({"a": 1});
        let err = apply_patch(
            &mut doc,
            &[PatchOp::Remove {
                path: "/missing".into(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DeltaError::PathNotFound(_)));
    }

    #[test]
    fn strict_replace_of_missing_path_fails() {
        let mut doc = json!({"a": [1, 2]});
        let err = apply_patch(
            &mut doc,
            &[PatchOp::Replace {
                path: "/a/5".into(),
                value: json!(0),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DeltaError::PathNotFound(_)));
    }

    #[test]
    fn capture_commits_the_mutated_copy() {
        let mut doc = json!({"count": 1});
        let (result, pair) = capture(&mut doc, |d| {
            d["count"] = json!(2);
            Some("done")
        })
        .unwrap()
        .unwrap();

        assert_eq!(result, "done");
        assert_eq!(doc["count"], 2);

        apply_patch(&mut doc, &pair.revert).unwrap();
        assert_eq!(doc["count"], 1);
        apply_patch(&mut doc, &pair.apply).unwrap();
        assert_eq!(doc["count"], 2);
    }

    #[test]
    fn capture_none_leaves_document_untouched() {
        let mut doc = json!({"count": 1});
        let outcome: Option<((), DeltaPair)> = capture(&mut doc, |d| {
            d["count"] = json!(99);
            None
        })
        .unwrap();

        assert!(outcome.is_none());
        assert_eq!(doc["count"], 1);
    }

    #[test]
    fn composed_pairs_revert_in_reverse_order() {
        let mut doc = json!({"n": 0});
        let p1 = capture_unit(&mut doc, |d| d["n"] = json!(1)).unwrap();
        let p2 = capture_unit(&mut doc, |d| d["n"] = json!(2)).unwrap();
        let combined = p1.compose(p2);

        apply_patch(&mut doc, &combined.revert).unwrap();
        assert_eq!(doc["n"], 0);
        apply_patch(&mut doc, &combined.apply).unwrap();
        assert_eq!(doc["n"], 2);
    }

    #[test]
    fn partition_splits_by_root_token() {
        let ops = vec![
            PatchOp::Replace {
                path: "/state/hp".into(),
                value: json!(1),
            },
            PatchOp::Add {
                path: "/memories/0".into(),
                value: json!({}),
            },
        ];
        let (memory_ops, world_ops) = partition_by_root(&ops, "memories");
        assert_eq!(memory_ops.len(), 1);
        assert_eq!(world_ops.len(), 1);
    }

    #[test]
    fn wire_form_matches_rfc6902() {
        let op = PatchOp::Move {
            from: "/a/1".into(),
            path: "/a/0".into(),
        };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"op": "move", "from": "/a/1", "path": "/a/0"})
        );
        let add = PatchOp::Add {
            path: "/x".into(),
            value: json!(5),
        };
        assert_eq!(
            serde_json::to_value(&add).unwrap(),
            json!({"op": "add", "path": "/x", "value": 5})
        );
    }
}
