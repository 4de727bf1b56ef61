/*! Dependency graph, topological ordering, and skip sets.

A composite's blocks are stored in insertion order, not execution
order, so both drivers need an explicit topological sort before they
can run it. Skip sets extend that: once a block reports idle, every
block reachable only through it is known to have nothing to do this
pass either, and can be left unpolled instead of spending a tick
finding that out firsthand.
*/
use std::collections::{HashMap, HashSet};

use crate::composite::BlockHandle;
use crate::error::{Error, Result};

/// Dependency graph: `deps[b]` lists every block whose output feeds one
/// of `b`'s inputs. Every block has an entry, even sources (empty list).
pub type DepGraph = HashMap<BlockHandle, Vec<BlockHandle>>;

/// Build the dependency graph from a flat `(dst) -> (src)` connection map.
pub fn build_deps(
    block_count: usize,
    connections: &HashMap<(BlockHandle, String), (BlockHandle, String)>,
) -> DepGraph {
    let mut deps: DepGraph = HashMap::new();
    for i in 0..block_count {
        deps.entry(BlockHandle(i)).or_default();
    }
    for ((dst, _), (src, _)) in connections {
        deps.entry(*dst).or_default().push(*src);
    }
    deps
}

/// Compute a topological order over `deps`, breaking ties by insertion
/// (block index) order for reproducibility.
///
/// Fails with [`Error::Topology`] if the graph contains a cycle.
pub fn topological_order(block_count: usize, deps: &DepGraph) -> Result<Vec<BlockHandle>> {
    let mut placed: HashSet<BlockHandle> = HashSet::new();
    let mut order = Vec::with_capacity(block_count);

    loop {
        let mut progressed = false;
        for i in 0..block_count {
            let h = BlockHandle(i);
            if placed.contains(&h) {
                continue;
            }
            let ready = deps
                .get(&h)
                .map(|ds| ds.iter().all(|d| placed.contains(d)))
                .unwrap_or(true);
            if ready {
                order.push(h);
                placed.insert(h);
                progressed = true;
            }
        }
        if order.len() == block_count {
            return Ok(order);
        }
        if !progressed {
            let stuck: Vec<usize> = (0..block_count)
                .filter(|i| !placed.contains(&BlockHandle(*i)))
                .collect();
            return Err(Error::topology(format!(
                "cycle detected among block indices {stuck:?}"
            )));
        }
    }
}

/// For every block, the transitive closure of its downstream consumers.
///
/// Used by the cooperative driver: when a block produces nothing, every
/// block in its skip set is guaranteed empty input this tick too.
pub fn skip_sets(block_count: usize, deps: &DepGraph) -> HashMap<BlockHandle, HashSet<BlockHandle>> {
    let mut rdeps: DepGraph = HashMap::new();
    for (dst, srcs) in deps {
        for src in srcs {
            rdeps.entry(*src).or_default().push(*dst);
        }
    }

    let mut result = HashMap::new();
    for i in 0..block_count {
        let root = BlockHandle(i);
        let mut seen: HashSet<BlockHandle> = HashSet::new();
        let mut stack: Vec<BlockHandle> = rdeps.get(&root).cloned().unwrap_or_default();
        while let Some(x) = stack.pop() {
            if seen.insert(x) {
                if let Some(next) = rdeps.get(&x) {
                    stack.extend(next.iter().copied());
                }
            }
        }
        result.insert(root, seen);
    }
    result
}
