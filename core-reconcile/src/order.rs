//! Dependency ordering for entity batches.
//!
//! Builds a directed graph where entity A depends on entity B when A's
//! relations reference B's identifier, then layers it with an iterative Kahn
//! sort: each level only references entities in earlier levels, so a level
//! can be applied concurrently once its predecessors are done. Deletion uses
//! the reverse level order.

use crate::entity::Entity;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Group entities into dependency levels for upserting.
///
/// Entities in one level reference nothing in the same or a later level, so
/// every entity of level N can be written concurrently after level N-1
/// completes. Relations pointing outside the batch are ignored; those
/// targets either already exist in the catalog or are auto-created per the
/// request options. When the graph contains a cycle the stuck entities form
/// one final level in their original batch order and a warning is logged;
/// the pass proceeds rather than aborting.
pub fn upsert_levels(entities: Vec<Entity>) -> Vec<Vec<Entity>> {
    let levels = level_indexes(&entities);
    take_levels(entities, levels)
}

/// Reverse of [`upsert_levels`]: referrers first, targets last.
pub fn delete_levels(entities: Vec<Entity>) -> Vec<Vec<Entity>> {
    let mut levels = level_indexes(&entities);
    levels.reverse();
    take_levels(entities, levels)
}

/// Flattened [`upsert_levels`], for sequential application.
pub fn sort_for_upsert(entities: Vec<Entity>) -> Vec<Entity> {
    upsert_levels(entities).into_iter().flatten().collect()
}

/// Flattened [`delete_levels`], for sequential application.
pub fn sort_for_delete(entities: Vec<Entity>) -> Vec<Entity> {
    delete_levels(entities).into_iter().flatten().collect()
}

fn take_levels(entities: Vec<Entity>, levels: Vec<Vec<usize>>) -> Vec<Vec<Entity>> {
    let mut slots: Vec<Option<Entity>> = entities.into_iter().map(Some).collect();
    levels
        .into_iter()
        .map(|level| level.into_iter().filter_map(|i| slots[i].take()).collect())
        .collect()
}

/// Kahn's algorithm over batch indexes, iterative to bound memory on large
/// batches, producing one wave of zero-in-degree nodes per level.
fn level_indexes(entities: &[Entity]) -> Vec<Vec<usize>> {
    // First entity wins on duplicate identifiers within a batch.
    let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(entities.len());
    for (i, entity) in entities.iter().enumerate() {
        index_of.entry(entity.identifier.as_str()).or_insert(i);
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entities.len()];
    let mut in_degree: Vec<usize> = vec![0; entities.len()];

    for (i, entity) in entities.iter().enumerate() {
        for target in entity.relation_targets() {
            if let Some(&j) = index_of.get(target) {
                if j != i {
                    dependents[j].push(i);
                    in_degree[i] += 1;
                }
            }
        }
    }

    let mut current: Vec<usize> = (0..entities.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut levels: Vec<Vec<usize>> = Vec::new();
    let mut placed = 0;

    while !current.is_empty() {
        placed += current.len();
        let mut next = Vec::new();
        for &i in &current {
            for &dep in &dependents[i] {
                in_degree[dep] -= 1;
                if in_degree[dep] == 0 {
                    next.push(dep);
                }
            }
        }
        next.sort_unstable();
        levels.push(std::mem::replace(&mut current, next));
    }

    if placed < entities.len() {
        let ordered: HashSet<usize> = levels.iter().flatten().copied().collect();
        let stuck: Vec<usize> = (0..entities.len()).filter(|i| !ordered.contains(i)).collect();
        warn!(
            stuck = stuck.len(),
            keys = ?stuck.iter().map(|&i| entities[i].key().to_string()).collect::<Vec<_>>(),
            "Relation graph contains a cycle; appending stuck entities in batch order"
        );
        levels.push(stuck);
    }

    levels
}
