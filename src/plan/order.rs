//! Precedence graph over aspects, sorted topologically.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
struct Links<T> {
    incoming: BTreeSet<T>,
    outgoing: BTreeSet<T>,
}

/// Collects `first` before `later` relations and computes a total order.
/// Only nodes that appear in some relation take part.
#[derive(Debug)]
pub struct OrderPlanner<T: Copy + Ord> {
    nodes: BTreeMap<T, Links<T>>,
}

impl<T: Copy + Ord> Default for OrderPlanner<T> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }
}

impl<T: Copy + Ord> OrderPlanner<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn precedence(&mut self, first: T, later: T) {
        if first == later {
            return;
        }
        self.nodes
            .entry(first)
            .or_insert_with(|| Links {
                incoming: BTreeSet::new(),
                outgoing: BTreeSet::new(),
            })
            .outgoing
            .insert(later);
        self.nodes
            .entry(later)
            .or_insert_with(|| Links {
                incoming: BTreeSet::new(),
                outgoing: BTreeSet::new(),
            })
            .incoming
            .insert(first);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kahn's algorithm; among ready nodes the one with the smallest
    /// `baseline` key goes first. On a cycle, returns the nodes on it.
    pub fn plan<K: Ord>(&self, baseline: impl Fn(&T) -> K) -> Result<Vec<T>, Vec<T>> {
        let mut in_degree: BTreeMap<T, usize> = self
            .nodes
            .iter()
            .map(|(n, l)| (*n, l.incoming.len()))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        loop {
            let next = in_degree
                .iter()
                .filter(|(_, d)| **d == 0)
                .map(|(n, _)| *n)
                .min_by_key(|n| baseline(n));
            let Some(node) = next else { break };
            in_degree.remove(&node);
            order.push(node);
            for later in &self.nodes[&node].outgoing {
                if let Some(d) = in_degree.get_mut(later) {
                    *d -= 1;
                }
            }
        }

        if in_degree.is_empty() {
            return Ok(order);
        }

        // Nodes left over are on a cycle or downstream of one; drop the
        // ones that cannot reach back into the remainder.
        let mut rest: BTreeSet<T> = in_degree.into_keys().collect();
        loop {
            let sinks: Vec<T> = rest
                .iter()
                .filter(|n| !self.nodes[*n].outgoing.iter().any(|o| rest.contains(o)))
                .copied()
                .collect();
            if sinks.is_empty() {
                break;
            }
            for s in sinks {
                rest.remove(&s);
            }
        }
        let mut cycle: Vec<T> = rest.into_iter().collect();
        cycle.sort_by_key(|n| baseline(n));
        Err(cycle)
    }
}
