//! Commit-observer-driven index maintenance: a registered `IndexSync`
//! receives every commit's row mutations for the table it watches and keeps
//! its in-memory graph (and pending counters) current without ever
//! re-scanning the table itself.

use std::collections::HashSet;

use crate::error::Result;
use crate::writer::{MutationKind, RowMutation};

use super::graph::HnswGraph;
use super::persist;
use super::VectorSource;

/// Point-in-time stats a caller can poll to decide whether to persist the
/// index: counts plus a monotonic version and an FNV-1a checksum of
/// the current serialized topology, so two snapshots can be compared
/// without re-reading the whole blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSnapshot {
    pub base_node_count: usize,
    pub active_node_count: usize,
    pub pending_upsert_count: usize,
    pub pending_delete_count: usize,
    pub version: u64,
    pub checksum: u64,
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    bytes.iter().fold(OFFSET_BASIS, |hash, &b| (hash ^ b as u64).wrapping_mul(PRIME))
}

/// Watches one `(table, column)` pair's commits and keeps `graph` in sync.
pub struct IndexSync {
    table: String,
    graph: HnswGraph,
    base_node_count: usize,
    pending_upserts: HashSet<i64>,
    pending_deletes: HashSet<i64>,
    version: u64,
}

impl IndexSync {
    pub fn new(table: impl Into<String>, graph: HnswGraph) -> Self {
        let base_node_count = graph.len();
        IndexSync {
            table: table.into(),
            graph,
            base_node_count,
            pending_upserts: HashSet::new(),
            pending_deletes: HashSet::new(),
            version: 0,
        }
    }

    pub fn graph(&self) -> &HnswGraph {
        &self.graph
    }

    /// Applies every mutation in `mutations` that touches this sync's
    /// table: an `Insert` re-reads the row's vector through `resolver` and
    /// upserts it; a `Delete` tombstones the node. Rows the resolver can no
    /// longer find (already deleted again before sync ran) are skipped
    /// rather than treated as an error.
    pub fn observe(&mut self, mutations: &[RowMutation], resolver: &mut dyn VectorSource) -> Result<()> {
        let mut touched = false;
        for mutation in mutations {
            if mutation.table != self.table {
                continue;
            }
            touched = true;
            match mutation.kind {
                MutationKind::Insert => {
                    if let Some(vector) = resolver.resolve(mutation.row_id)? {
                        self.graph.upsert(mutation.row_id, vector);
                        self.pending_upserts.insert(mutation.row_id);
                        self.pending_deletes.remove(&mutation.row_id);
                    }
                }
                MutationKind::Delete => {
                    self.graph.tombstone(mutation.row_id);
                    self.pending_deletes.insert(mutation.row_id);
                    self.pending_upserts.remove(&mutation.row_id);
                }
            }
        }
        if touched {
            self.version += 1;
        }
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        persist::serialize(&self.graph)
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        let blob = self.serialize();
        IndexSnapshot {
            base_node_count: self.base_node_count,
            active_node_count: self.graph.active_count(),
            pending_upsert_count: self.pending_upserts.len(),
            pending_delete_count: self.pending_deletes.len(),
            version: self.version,
            checksum: fnv1a(&blob),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::graph::HnswConfig;
    use std::collections::HashMap;

    struct MapResolver(HashMap<i64, Vec<f32>>);
    impl VectorSource for MapResolver {
        fn resolve(&mut self, row_id: i64) -> Result<Option<Vec<f32>>> {
            Ok(self.0.get(&row_id).cloned())
        }
    }

    fn config() -> HnswConfig {
        HnswConfig { seed: 9, dimensions: 2, ..HnswConfig::default() }
    }

    #[test]
    fn insert_mutation_upserts_and_bumps_version() {
        let graph = HnswGraph::new(config()).unwrap();
        let mut sync = IndexSync::new("vectors", graph);
        let mut resolver = MapResolver(HashMap::from([(1, vec![1.0, 0.0])]));
        sync.observe(&[RowMutation { table: "vectors".to_string(), row_id: 1, kind: MutationKind::Insert }], &mut resolver)
            .unwrap();
        let snap = sync.snapshot();
        assert_eq!(snap.pending_upsert_count, 1);
        assert_eq!(snap.version, 1);
    }

    #[test]
    fn delete_mutation_tombstones_and_is_excluded_from_active_count() {
        let mut graph = HnswGraph::new(config()).unwrap();
        graph.insert(1, vec![1.0, 0.0]);
        let mut sync = IndexSync::new("vectors", graph);
        let mut resolver = MapResolver(HashMap::new());
        sync.observe(&[RowMutation { table: "vectors".to_string(), row_id: 1, kind: MutationKind::Delete }], &mut resolver)
            .unwrap();
        let snap = sync.snapshot();
        assert_eq!(snap.active_node_count, 0);
        assert_eq!(snap.pending_delete_count, 1);
    }

    #[test]
    fn mutation_on_a_different_table_is_ignored() {
        let graph = HnswGraph::new(config()).unwrap();
        let mut sync = IndexSync::new("vectors", graph);
        let mut resolver = MapResolver(HashMap::new());
        sync.observe(&[RowMutation { table: "other".to_string(), row_id: 1, kind: MutationKind::Insert }], &mut resolver)
            .unwrap();
        assert_eq!(sync.snapshot().version, 0);
    }
}
