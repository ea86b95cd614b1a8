//! Top-K query types and the bounded score heap.

use crate::binary::BitSource;
use crate::config::Distance;
use crate::record::VectorInput;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Predicate evaluated on a candidate's meta before any vector math.
pub type MetaPredicate = Box<dyn Fn(&Map<String, Value>) -> bool + Send + Sync>;

/// A top-K nearest-neighbor query.
pub struct Query {
    pub vector: VectorInput,
    pub k: usize,
    pub metric: Distance,
    pub predicate: Option<MetaPredicate>,
    /// Bound on the number of records examined, counted before the
    /// predicate runs.
    pub max_candidates: Option<usize>,
}

impl Query {
    /// A dense cosine query.
    pub fn dense(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector: VectorInput::Dense(vector),
            k,
            metric: Distance::Cosine,
            predicate: None,
            max_candidates: None,
        }
    }

    /// A binary Hamming query from any bit source.
    pub fn binary(bits: BitSource, k: usize) -> Self {
        Self {
            vector: VectorInput::Binary(bits),
            k,
            metric: Distance::Hamming,
            predicate: None,
            max_candidates: None,
        }
    }

    pub fn with_metric(mut self, metric: Distance) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = Some(max);
        self
    }
}

/// One query result. Higher score is better for every metric; binary
/// hits also carry the raw Hamming distance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: u64,
    pub score: f32,
    pub hamming: Option<u32>,
    pub meta: Map<String, Value>,
}

struct HeapEntry {
    score: f32,
    id: u64,
    hamming: Option<u32>,
    meta: Map<String, Value>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on score: BinaryHeap pops its max, so invert. Ties
        // break toward evicting the higher id.
        other
            .score
            .total_cmp(&self.score)
            .then(other.id.cmp(&self.id))
    }
}

/// A bounded best-score collector: a min-heap of size <= k keyed by
/// score; when full, a candidate replaces the current worst only if it
/// scores strictly better.
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<HeapEntry>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1)),
        }
    }

    pub fn offer(&mut self, id: u64, score: f32, hamming: Option<u32>, meta: &Map<String, Value>) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(HeapEntry {
                score,
                id,
                hamming,
                meta: meta.clone(),
            });
            return;
        }
        if let Some(worst) = self.heap.peek() {
            if score > worst.score {
                self.heap.pop();
                self.heap.push(HeapEntry {
                    score,
                    id,
                    hamming,
                    meta: meta.clone(),
                });
            }
        }
    }

    /// Drain into hits sorted best-score-first (ties by ascending id).
    pub fn into_hits(self) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = self
            .heap
            .into_iter()
            .map(|e| SearchHit {
                id: e.id,
                score: e.score,
                hamming: e.hamming,
                meta: e.meta,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        hits
    }
}

/// Dot product of two equal-length vectors.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Negated Euclidean distance, so higher is better.
pub(crate) fn neg_euclidean(a: &[f32], b: &[f32]) -> f32 {
    -a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}
