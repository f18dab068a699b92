//! Binary persistence for an HNSW graph: a little-endian topology
//! blob written into the `_hnsw_<table>_<column>` shadow table's single
//! row. Vectors are never stored in the blob -- only row ids, levels, and
//! neighbor lists; loading re-reads vectors from the source table through
//! a `VectorSource`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor as IoCursor;

use crate::error::{Error, ErrorContext, Result};

use super::graph::{DistanceMetric, HnswConfig, HnswGraph};

const FORMAT_VERSION: u8 = 1;

fn op() -> &'static str {
    "hnsw persistence"
}

/// Serializes `graph`'s topology -- configuration, entry point, and every
/// node's `(rowId, level)` plus per-layer neighbor lists -- to the
/// on-disk blob format.
pub fn serialize(graph: &HnswGraph) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u8(FORMAT_VERSION).unwrap();
    out.write_u32::<LittleEndian>(graph.config.m as u32).unwrap();
    out.write_u32::<LittleEndian>(graph.config.m0 as u32).unwrap();
    out.write_u32::<LittleEndian>(graph.config.ef_construction as u32).unwrap();
    out.write_u32::<LittleEndian>(graph.config.ef_search as u32).unwrap();
    out.write_u32::<LittleEndian>(graph.config.dimensions as u32).unwrap();
    out.write_u8(graph.config.metric.code()).unwrap();
    out.write_i64::<LittleEndian>(graph.entry_point_index().map(|i| i as i64).unwrap_or(-1)).unwrap();
    out.write_u32::<LittleEndian>(graph.max_level_value() as u32).unwrap();
    out.write_u32::<LittleEndian>(graph.len() as u32).unwrap();
    out.write_u8(graph.config.use_heuristic as u8).unwrap();
    out.write_u64::<LittleEndian>(graph.config.seed).unwrap();

    let neighbor_lists: Vec<_> = graph.neighbors_by_node().collect();
    for ((row_id, level, _vector), layer_neighbors) in graph.rows().zip(neighbor_lists) {
        out.write_i64::<LittleEndian>(row_id).unwrap();
        out.write_i32::<LittleEndian>(level as i32).unwrap();
        for layer in layer_neighbors {
            out.write_i32::<LittleEndian>(layer.len() as i32).unwrap();
            for &n in layer {
                out.write_i32::<LittleEndian>(n as i32).unwrap();
            }
        }
    }
    out
}

/// Topology read back from a blob, before vectors have been resolved.
pub struct PersistedTopology {
    pub config: HnswConfig,
    pub entry_point: Option<usize>,
    pub max_level: usize,
    pub node_count: usize,
    pub rows: Vec<(i64, usize)>,
    pub neighbors: Vec<Vec<Vec<u32>>>,
}

pub fn deserialize(bytes: &[u8]) -> Result<PersistedTopology> {
    let mut cursor = IoCursor::new(bytes);
    let version = read_u8(&mut cursor)?;
    if version != FORMAT_VERSION {
        return Err(Error::corrupt_page(format!("unsupported HNSW blob version {version}"), ErrorContext::new(op())));
    }
    let m = read_u32(&mut cursor)? as usize;
    let m0 = read_u32(&mut cursor)? as usize;
    let ef_construction = read_u32(&mut cursor)? as usize;
    let ef_search = read_u32(&mut cursor)? as usize;
    let dimensions = read_u32(&mut cursor)? as usize;
    let metric = DistanceMetric::from_code(read_u8(&mut cursor)?)?;
    let entry_point_raw = read_i64(&mut cursor)?;
    let entry_point = if entry_point_raw < 0 { None } else { Some(entry_point_raw as usize) };
    let max_level = read_u32(&mut cursor)? as usize;
    let node_count = read_u32(&mut cursor)? as usize;
    let use_heuristic = read_u8(&mut cursor)? != 0;
    let seed = read_u64(&mut cursor)?;

    let config = HnswConfig { m, m0, ef_construction, ef_search, use_heuristic, seed, dimensions, metric };

    let mut rows = Vec::with_capacity(node_count);
    let mut neighbors = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        let row_id = read_i64(&mut cursor)?;
        let level = read_i32(&mut cursor)? as usize;
        let mut layer_neighbors = Vec::with_capacity(level + 1);
        for _ in 0..=level {
            let count = read_i32(&mut cursor)? as usize;
            let mut layer = Vec::with_capacity(count);
            for _ in 0..count {
                layer.push(read_i32(&mut cursor)? as u32);
            }
            layer_neighbors.push(layer);
        }
        rows.push((row_id, level));
        neighbors.push(layer_neighbors);
    }

    Ok(PersistedTopology { config, entry_point, max_level, node_count, rows, neighbors })
}

/// Resolves every persisted row's vector through `resolver` and rebuilds a
/// live graph. `current_row_count` is the caller's freshly-counted row
/// count for the source table; a mismatch against the persisted node
/// count raises `StaleIndex` rather than silently returning a graph that
/// no longer reflects the table.
pub fn load(bytes: &[u8], resolver: &mut dyn super::VectorSource, index_name: &str, current_row_count: usize) -> Result<HnswGraph> {
    let topology = deserialize(bytes)?;
    if topology.node_count != current_row_count {
        return Err(Error::stale_index(index_name, topology.node_count, current_row_count));
    }

    let mut rows = Vec::with_capacity(topology.rows.len());
    for (row_id, level) in topology.rows {
        let vector = resolver.resolve(row_id)?.ok_or_else(|| Error::stale_index(index_name, topology.node_count, current_row_count))?;
        rows.push((row_id, level, vector));
    }

    HnswGraph::from_parts(topology.config, topology.entry_point, topology.max_level, rows, topology.neighbors)
}

fn read_u8(cursor: &mut IoCursor<&[u8]>) -> Result<u8> {
    cursor.read_u8().map_err(|e| Error::io("read hnsw blob", e))
}
fn read_u32(cursor: &mut IoCursor<&[u8]>) -> Result<u32> {
    cursor.read_u32::<LittleEndian>().map_err(|e| Error::io("read hnsw blob", e))
}
fn read_u64(cursor: &mut IoCursor<&[u8]>) -> Result<u64> {
    cursor.read_u64::<LittleEndian>().map_err(|e| Error::io("read hnsw blob", e))
}
fn read_i32(cursor: &mut IoCursor<&[u8]>) -> Result<i32> {
    cursor.read_i32::<LittleEndian>().map_err(|e| Error::io("read hnsw blob", e))
}
fn read_i64(cursor: &mut IoCursor<&[u8]>) -> Result<i64> {
    cursor.read_i64::<LittleEndian>().map_err(|e| Error::io("read hnsw blob", e))
}

/// Encodes a vector as little-endian `f32`s for storage in a BLOB column.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for &v in vector {
        out.write_f32::<LittleEndian>(v).unwrap();
    }
    out
}

/// Decodes a BLOB column's bytes back into a vector of `f32`s.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::corrupt_page("vector blob length is not a multiple of 4", ErrorContext::new(op())));
    }
    let mut cursor = IoCursor::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() / 4);
    for _ in 0..bytes.len() / 4 {
        out.push(cursor.read_f32::<LittleEndian>().map_err(|e| Error::io("decode vector blob", e))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::VectorSource;
    use std::collections::HashMap;

    struct MapResolver(HashMap<i64, Vec<f32>>);
    impl VectorSource for MapResolver {
        fn resolve(&mut self, row_id: i64) -> Result<Option<Vec<f32>>> {
            Ok(self.0.get(&row_id).cloned())
        }
    }

    #[test]
    fn round_trips_topology_and_resolved_vectors() {
        let mut graph = HnswGraph::new(HnswConfig { seed: 7, dimensions: 2, ..HnswConfig::default() }).unwrap();
        for i in 0..10 {
            graph.insert(i, vec![i as f32, 0.0]);
        }
        let blob = serialize(&graph);

        let mut resolver = MapResolver((0..10).map(|i| (i, vec![i as f32, 0.0])).collect());
        let loaded = load(&blob, &mut resolver, "idx", 10).unwrap();
        assert_eq!(loaded.len(), 10);
        let results = loaded.search(&[5.1, 0.0], 1, None);
        assert_eq!(results[0].0, 5);
    }

    #[test]
    fn row_count_mismatch_is_stale() {
        let mut graph = HnswGraph::new(HnswConfig { seed: 7, dimensions: 2, ..HnswConfig::default() }).unwrap();
        graph.insert(1, vec![1.0, 0.0]);
        let blob = serialize(&graph);
        let mut resolver = MapResolver(HashMap::from([(1, vec![1.0, 0.0])]));
        assert!(load(&blob, &mut resolver, "idx", 2).is_err());
    }

    #[test]
    fn vector_blob_round_trips() {
        let v = vec![1.5f32, -2.25, 0.0];
        let bytes = encode_vector(&v);
        assert_eq!(decode_vector(&bytes).unwrap(), v);
    }
}
