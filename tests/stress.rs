//! Randomized allocation/mark stress test, in the teacher crate's own style
//! of seeding a reproducible `rand_chacha` generator for allocator/GC stress
//! tests (`rand`/`rand_chacha` are carried as dev-dependencies from
//! `mmtk-core`'s `Cargo.toml` for exactly this purpose; see DESIGN.md).
//!
//! Builds a random pointer graph over a batch of allocated objects, retains a
//! random subset as roots, computes the expected reachable set by a plain BFS
//! over the same graph, runs one collection cycle, and checks the collector's
//! mark bits agree with that BFS exactly — every reachable object survives,
//! every unreachable one does not.

#![cfg(feature = "mock_test")]

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use nonmoving_gc::mock::MockRuntime;
use nonmoving_gc::{Field, NonMovingGc, RawPtr};

#[test]
fn randomized_pointer_graph_survives_collection_exactly_per_reachability() {
    let mut rng = ChaCha8Rng::seed_from_u64(0xC0FFEE);

    let rt = MockRuntime::new();
    let gc = Arc::new(NonMovingGc::new(1, rt));

    const OBJECT_COUNT: usize = 200;
    let objs: Vec<_> = (0..OBJECT_COUNT).map(|_| gc.allocate(0, 2)).collect();

    // Random pointer graph: each object gets 0-3 edges to earlier-or-later
    // objects (cycles allowed — the mark engine must be cycle-safe via its
    // per-block mark bit dedup).
    let mut graph: Vec<Vec<usize>> = vec![Vec::new(); OBJECT_COUNT];
    for (i, edges) in graph.iter_mut().enumerate() {
        let edge_count = rng.random_range(0..=3);
        for _ in 0..edge_count {
            let target = rng.random_range(0..OBJECT_COUNT);
            if target != i {
                edges.push(target);
            }
        }
        let fields = edges
            .iter()
            .map(|&t| Field::Pointer(RawPtr::from_address(objs[t])))
            .collect();
        gc.vm().set_fields(objs[i], fields);
    }

    // Retain roughly a quarter of the objects as roots.
    let mut roots = Vec::new();
    for (i, &addr) in objs.iter().enumerate() {
        if rng.random_bool(0.25) {
            gc.vm().add_root(RawPtr::from_address(addr));
            roots.push(i);
        }
    }

    // Expected reachable set via plain BFS over the same graph.
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::from(roots);
    while let Some(i) = queue.pop_front() {
        if reachable.insert(i) {
            for &t in &graph[i] {
                queue.push_back(t);
            }
        }
    }

    gc.collect(vec![], vec![]);
    gc.wait_until_finished();

    for (i, &addr) in objs.iter().enumerate() {
        let alive = gc.is_alive(RawPtr::from_address(addr));
        assert_eq!(
            alive,
            reachable.contains(&i),
            "object {i} liveness mismatch: alive={alive}, expected_reachable={}",
            reachable.contains(&i)
        );
    }
}
