// Copyright 2020. The Quasar Development Community
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::collections::BTreeMap;

use crate::{chain_storage::db::AddrInfo, transactions::Destination};

/// One node of the invite forest.
#[derive(Debug, Clone)]
pub struct RelationNode {
    pub dest: Destination,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// The invite-relation forest of a DeFi fork, built from the persisted address-info records as an
/// arena with dense node ids. Parents that never received an invite themselves become roots.
#[derive(Debug, Default)]
pub struct RelationGraph {
    nodes: Vec<RelationNode>,
    lookup: BTreeMap<Destination, usize>,
    roots: Vec<usize>,
}

impl RelationGraph {
    /// Build the forest. Relations are assumed acyclic; insertion-time checks uphold that.
    pub fn construct(map_address: &BTreeMap<Destination, AddrInfo>) -> Self {
        let mut graph = RelationGraph::default();
        for dest in map_address.keys() {
            graph.intern(dest.clone());
        }
        // parents outside the invited set become roots
        for info in map_address.values() {
            graph.intern(info.parent.clone());
        }
        for (dest, info) in map_address {
            let child = graph.lookup[dest];
            let parent = graph.lookup[&info.parent];
            graph.nodes[child].parent = Some(parent);
            graph.nodes[parent].children.push(child);
        }
        for (id, node) in graph.nodes.iter().enumerate() {
            if node.parent.is_none() {
                graph.roots.push(id);
            }
        }
        graph
    }

    fn intern(&mut self, dest: Destination) -> usize {
        if let Some(id) = self.lookup.get(&dest) {
            return *id;
        }
        let id = self.nodes.len();
        self.nodes.push(RelationNode {
            dest: dest.clone(),
            parent: None,
            children: Vec::new(),
        });
        self.lookup.insert(dest, id);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: usize) -> &RelationNode {
        &self.nodes[id]
    }

    pub fn node_of(&self, dest: &Destination) -> Option<usize> {
        self.lookup.get(dest).copied()
    }

    /// Node ids in post order: every child precedes its parent, roots come last within their
    /// tree. The traversal is iterative; invite chains can be long.
    pub fn post_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        for &root in &self.roots {
            let mut stack = vec![(root, false)];
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    order.push(id);
                    continue;
                }
                stack.push((id, true));
                for &child in self.nodes[id].children.iter().rev() {
                    stack.push((child, false));
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod test {
    use quasar_common_types::Hash256;

    use super::*;

    fn dest(n: u8) -> Destination {
        Destination::PubKey([n; 32])
    }

    fn info(parent: u8) -> AddrInfo {
        AddrInfo {
            parent: dest(parent),
            root: dest(parent),
            txid: Hash256([parent; 32]),
        }
    }

    #[test]
    fn builds_forest_with_uninvited_roots() {
        // 1 -> {2, 3}, 3 -> {4}; node 1 never invited
        let mut map = BTreeMap::new();
        map.insert(dest(2), info(1));
        map.insert(dest(3), info(1));
        map.insert(dest(4), info(3));
        let graph = RelationGraph::construct(&map);
        assert_eq!(graph.len(), 4);

        let root = graph.node_of(&dest(1)).unwrap();
        assert!(graph.node(root).parent.is_none());
        assert_eq!(graph.node(root).children.len(), 2);

        let leaf = graph.node_of(&dest(4)).unwrap();
        assert_eq!(graph.node(leaf).children.len(), 0);
    }

    #[test]
    fn post_order_visits_children_first() {
        let mut map = BTreeMap::new();
        map.insert(dest(2), info(1));
        map.insert(dest(3), info(2));
        let graph = RelationGraph::construct(&map);
        let order = graph.post_order();
        assert_eq!(order.len(), 3);
        let pos =
            |d: u8| order.iter().position(|&id| graph.node(id).dest == dest(d)).unwrap();
        assert!(pos(3) < pos(2));
        assert!(pos(2) < pos(1));
    }

    #[test]
    fn empty_map_builds_empty_graph() {
        let graph = RelationGraph::construct(&BTreeMap::new());
        assert!(graph.is_empty());
        assert!(graph.post_order().is_empty());
    }
}
