//! Layered proximity graph: insertion (Algorithm 1) and k-nearest search
//! (Algorithm 5) over a multi-level skip-graph of vectors.

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    DotProduct,
}

impl DistanceMetric {
    pub fn code(self) -> u8 {
        match self {
            DistanceMetric::Cosine => 0,
            DistanceMetric::Euclidean => 1,
            DistanceMetric::DotProduct => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(DistanceMetric::Cosine),
            1 => Ok(DistanceMetric::Euclidean),
            2 => Ok(DistanceMetric::DotProduct),
            n => Err(Error::argument_error(format!("unknown distance metric code {n}"))),
        }
    }

    /// All three metrics are normalized so "lower is better", letting one
    /// beam-search implementation serve all of them. `DotProduct` is
    /// negated going in and negated back on the way out.
    fn normalize(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
            DistanceMetric::Euclidean => a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt(),
            DistanceMetric::DotProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }

    /// Undoes the `DotProduct` negation for a result score handed back to
    /// the caller; a no-op for the other two metrics.
    pub fn denormalize(self, score: f32) -> f32 {
        match self {
            DistanceMetric::DotProduct => -score,
            _ => score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HnswConfig {
    pub m: usize,
    pub m0: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub use_heuristic: bool,
    /// 0 means non-deterministic: the graph draws its own seed from system
    /// entropy once, at construction.
    pub seed: u64,
    pub dimensions: usize,
    pub metric: DistanceMetric,
}

impl HnswConfig {
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(Error::argument_out_of_range("HNSW M must be >= 2"));
        }
        if self.m0 < self.m {
            return Err(Error::argument_out_of_range("HNSW M0 must be >= M"));
        }
        if self.ef_construction < 1 {
            return Err(Error::argument_out_of_range("HNSW efConstruction must be >= 1"));
        }
        if self.ef_search < 1 {
            return Err(Error::argument_out_of_range("HNSW efSearch must be >= 1"));
        }
        if self.dimensions == 0 {
            return Err(Error::argument_out_of_range("HNSW dimensions must be > 0"));
        }
        Ok(())
    }

    fn level_multiplier(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }
}

impl Default for HnswConfig {
    fn default() -> Self {
        HnswConfig {
            m: 16,
            m0: 32,
            ef_construction: 200,
            ef_search: 50,
            use_heuristic: true,
            seed: 0,
            dimensions: 0,
            metric: DistanceMetric::Cosine,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    level: usize,
    /// `neighbors[layer]` holds internal node indices, for `layer` in
    /// `0..=level`.
    neighbors: Vec<Vec<u32>>,
}

/// A beam-search candidate: internal node index plus its distance to the
/// query, ordered so a `BinaryHeap` can serve as either a min-heap (explore
/// nearest first) or a max-heap (evict farthest first) depending on which
/// field wraps it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    index: usize,
    distance: f32,
}
impl Eq for Scored {}
impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.partial_cmp(&other.distance).unwrap_or(Ordering::Equal)
    }
}

/// Min-heap wrapper (nearest distance pops first).
#[derive(Debug, Clone, Copy, PartialEq)]
struct MinScored(Scored);
impl Eq for MinScored {}
impl PartialOrd for MinScored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for MinScored {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

pub struct HnswGraph {
    pub config: HnswConfig,
    nodes: Vec<Node>,
    vectors: Vec<Vec<f32>>,
    row_ids: Vec<i64>,
    row_index: HashMap<i64, usize>,
    tombstoned: Vec<bool>,
    entry_point: Option<usize>,
    max_level: usize,
    rng: StdRng,
}

impl HnswGraph {
    pub fn new(config: HnswConfig) -> Result<Self> {
        config.validate()?;
        let rng = if config.seed == 0 {
            StdRng::from_rng(rand::thread_rng()).map_err(|e| Error::argument_error(format!("failed to seed HNSW rng: {e}")))?
        } else {
            StdRng::seed_from_u64(config.seed)
        };
        Ok(HnswGraph {
            config,
            nodes: Vec::new(),
            vectors: Vec::new(),
            row_ids: Vec::new(),
            row_index: HashMap::new(),
            tombstoned: Vec::new(),
            entry_point: None,
            max_level: 0,
            rng,
        })
    }

    /// Reconstructs a graph from persisted topology plus freshly-resolved
    /// vectors -- used by `persist::load`. Bypasses `insert`'s level
    /// sampling and neighbor selection since the topology is already fixed.
    pub(crate) fn from_parts(
        config: HnswConfig,
        entry_point: Option<usize>,
        max_level: usize,
        rows: Vec<(i64, usize, Vec<f32>)>,
        neighbors: Vec<Vec<Vec<u32>>>,
    ) -> Result<Self> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        let mut row_index = HashMap::new();
        let mut nodes = Vec::with_capacity(rows.len());
        let mut vectors = Vec::with_capacity(rows.len());
        let mut row_ids = Vec::with_capacity(rows.len());
        for (i, ((row_id, level, vector), layer_neighbors)) in rows.into_iter().zip(neighbors).enumerate() {
            row_index.insert(row_id, i);
            nodes.push(Node { level, neighbors: layer_neighbors });
            vectors.push(vector);
            row_ids.push(row_id);
        }
        let tombstoned = vec![false; nodes.len()];
        Ok(HnswGraph {
            config,
            nodes,
            vectors,
            row_ids,
            row_index,
            tombstoned,
            entry_point,
            max_level,
            rng,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.tombstoned.iter().filter(|t| !**t).count()
    }

    pub(crate) fn rows(&self) -> impl Iterator<Item = (i64, usize, &[f32])> {
        self.nodes.iter().enumerate().map(|(i, n)| (self.row_ids[i], n.level, self.vectors[i].as_slice()))
    }

    pub(crate) fn neighbors_by_node(&self) -> impl Iterator<Item = &Vec<Vec<u32>>> {
        self.nodes.iter().map(|n| &n.neighbors)
    }

    pub(crate) fn entry_point_index(&self) -> Option<usize> {
        self.entry_point
    }

    pub(crate) fn max_level_value(&self) -> usize {
        self.max_level
    }

    fn sample_level(&mut self) -> usize {
        let u: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        (-u.ln() * self.config.level_multiplier()).floor() as usize
    }

    fn distance_to(&self, index: usize, query: &[f32]) -> f32 {
        self.config.metric.normalize(&self.vectors[index], query)
    }

    fn greedy_closest(&self, from: usize, query: &[f32], layer: usize) -> usize {
        let mut current = from;
        let mut current_dist = self.distance_to(current, query);
        loop {
            let mut improved = false;
            if let Some(layer_neighbors) = self.nodes[current].neighbors.get(layer) {
                for &n in layer_neighbors {
                    let d = self.distance_to(n as usize, query);
                    if d < current_dist {
                        current = n as usize;
                        current_dist = d;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam-searches `layer` starting from `entry`, returning up to `ef`
    /// candidates ordered nearest-first.
    fn search_layer(&self, query: &[f32], entry: usize, ef: usize, layer: usize) -> Vec<Scored> {
        let mut visited = HashSet::new();
        visited.insert(entry);
        let entry_dist = self.distance_to(entry, query);
        let mut candidates = BinaryHeap::new();
        candidates.push(MinScored(Scored { index: entry, distance: entry_dist }));
        let mut result = BinaryHeap::new();
        result.push(Scored { index: entry, distance: entry_dist });

        while let Some(MinScored(nearest)) = candidates.pop() {
            let worst_in_result = result.peek().map(|s| s.distance).unwrap_or(f32::INFINITY);
            if nearest.distance > worst_in_result && result.len() >= ef {
                break;
            }
            if let Some(layer_neighbors) = self.nodes[nearest.index].neighbors.get(layer) {
                for &n in layer_neighbors {
                    let n = n as usize;
                    if !visited.insert(n) {
                        continue;
                    }
                    let d = self.distance_to(n, query);
                    let worst = result.peek().map(|s| s.distance).unwrap_or(f32::INFINITY);
                    if result.len() < ef || d < worst {
                        candidates.push(MinScored(Scored { index: n, distance: d }));
                        result.push(Scored { index: n, distance: d });
                        if result.len() > ef {
                            result.pop();
                        }
                    }
                }
            }
        }

        // `into_sorted_vec` yields ascending order by `Ord`, and `Scored`'s
        // `Ord` is a plain ascending compare on distance, so this is
        // already nearest-first.
        result.into_sorted_vec()
    }

    /// Selects up to `cap` neighbors for a node at `target`'s position out
    /// of `candidates`. The heuristic rule keeps a candidate only if it is
    /// closer to the target than to every neighbor already selected,
    /// spreading edges across directions instead of clustering on the
    /// nearest cluster alone.
    fn select_neighbors(&self, target: &[f32], mut candidates: Vec<Scored>, cap: usize) -> Vec<usize> {
        candidates.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        if !self.config.use_heuristic {
            candidates.truncate(cap);
            return candidates.into_iter().map(|c| c.index).collect();
        }
        let mut selected: Vec<usize> = Vec::with_capacity(cap);
        for c in candidates {
            if selected.len() >= cap {
                break;
            }
            let dist_to_target = c.distance;
            let joins = selected.iter().all(|&s| dist_to_target < self.distance_between(c.index, s));
            if joins {
                selected.push(c.index);
            }
        }
        selected
    }

    fn distance_between(&self, a: usize, b: usize) -> f32 {
        self.config.metric.normalize(&self.vectors[a], &self.vectors[b])
    }

    fn connect(&mut self, from: usize, to: usize, layer: usize) {
        let layer_neighbors = &mut self.nodes[from].neighbors[layer];
        if !layer_neighbors.contains(&(to as u32)) {
            layer_neighbors.push(to as u32);
        }
    }

    fn prune_if_needed(&mut self, node: usize, layer: usize, cap: usize) {
        if self.nodes[node].neighbors[layer].len() <= cap {
            return;
        }
        let target = self.vectors[node].clone();
        let candidates: Vec<Scored> = self.nodes[node].neighbors[layer]
            .iter()
            .map(|&n| Scored { index: n as usize, distance: self.config.metric.normalize(&self.vectors[n as usize], &target) })
            .collect();
        let selected = self.select_neighbors(&target, candidates, cap);
        self.nodes[node].neighbors[layer] = selected.into_iter().map(|i| i as u32).collect();
    }

    /// Algorithm 1: inserts a new node, descending greedily through layers
    /// above its sampled level, then beam-searching and connecting at every
    /// layer from its level down to 0.
    pub fn insert(&mut self, row_id: i64, vector: Vec<f32>) -> usize {
        let level = self.sample_level();
        let idx = self.nodes.len();
        self.nodes.push(Node { level, neighbors: vec![Vec::new(); level + 1] });
        self.vectors.push(vector);
        self.row_ids.push(row_id);
        self.row_index.insert(row_id, idx);
        self.tombstoned.push(false);

        let Some(mut entry) = self.entry_point else {
            self.entry_point = Some(idx);
            self.max_level = level;
            return idx;
        };

        let vector = self.vectors[idx].clone();
        for layer in (level + 1..=self.max_level).rev() {
            entry = self.greedy_closest(entry, &vector, layer);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let cap = if layer == 0 { self.config.m0 } else { self.config.m };
            let candidates = self.search_layer(&vector, entry, self.config.ef_construction, layer);
            let selected = self.select_neighbors(&vector, candidates, cap);
            for &n in &selected {
                self.connect(idx, n, layer);
                self.connect(n, idx, layer);
                self.prune_if_needed(n, layer, cap);
            }
            if let Some(&first) = selected.first() {
                entry = first;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(idx);
        }
        idx
    }

    /// Marks `row_id`'s node as deleted without compacting the node array
    /// (internal indices back every neighbor list, so removal would
    /// require renumbering every edge in the graph).
    pub fn tombstone(&mut self, row_id: i64) -> bool {
        match self.row_index.get(&row_id) {
            Some(&idx) => {
                self.tombstoned[idx] = true;
                true
            }
            None => false,
        }
    }

    /// Rebinds `row_id`'s vector in place if the node already exists,
    /// otherwise inserts it fresh.
    pub fn upsert(&mut self, row_id: i64, vector: Vec<f32>) {
        if let Some(&idx) = self.row_index.get(&row_id) {
            self.vectors[idx] = vector;
            self.tombstoned[idx] = false;
        } else {
            self.insert(row_id, vector);
        }
    }

    /// Algorithm 5: greedy-descends to layer 0, beam-searches with width
    /// `max(ef, k)`, and returns up to `k` `(row_id, score)` pairs nearest
    /// first (score already denormalized for the configured metric).
    pub fn search(&self, query: &[f32], k: usize, ef_search: Option<usize>) -> Vec<(i64, f32)> {
        let Some(entry_point) = self.entry_point else { return Vec::new() };
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let ef = ef_search.unwrap_or(self.config.ef_search).max(k);

        let mut entry = entry_point;
        for layer in (1..=self.max_level).rev() {
            entry = self.greedy_closest(entry, query, layer);
        }

        let mut candidates = self.search_layer(query, entry, ef, 0);
        candidates.retain(|c| !self.tombstoned[c.index]);
        candidates.truncate(k);
        candidates
            .into_iter()
            .map(|c| (self.row_ids[c.index], self.config.metric.denormalize(c.distance)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dims: usize) -> HnswConfig {
        HnswConfig {
            seed: 42,
            dimensions: dims,
            ..HnswConfig::default()
        }
    }

    #[test]
    fn rejects_invalid_configuration() {
        let mut cfg = config(4);
        cfg.m = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn insert_and_search_returns_nearest_neighbor() {
        let mut graph = HnswGraph::new(config(2)).unwrap();
        for i in 0..50 {
            graph.insert(i, vec![i as f32, 0.0]);
        }
        let results = graph.search(&[25.1, 0.0], 3, None);
        assert_eq!(results[0].0, 25);
    }

    #[test]
    fn tombstoned_node_is_excluded_from_search() {
        let mut graph = HnswGraph::new(config(2)).unwrap();
        for i in 0..20 {
            graph.insert(i, vec![i as f32, 0.0]);
        }
        graph.tombstone(10);
        let results = graph.search(&[10.0, 0.0], 1, Some(20));
        assert_ne!(results[0].0, 10);
    }

    #[test]
    fn upsert_on_existing_row_rebinds_vector() {
        let mut graph = HnswGraph::new(config(2)).unwrap();
        graph.insert(1, vec![0.0, 0.0]);
        graph.upsert(1, vec![100.0, 100.0]);
        let results = graph.search(&[100.0, 100.0], 1, None);
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn dot_product_scores_are_negated_back() {
        let metric = DistanceMetric::DotProduct;
        let internal = metric.normalize(&[1.0, 0.0], &[1.0, 0.0]);
        assert_eq!(metric.denormalize(internal), 1.0);
    }
}
