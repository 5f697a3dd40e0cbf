// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Graph entities as returned by the database.
//!
//! These types are receive-only: they can appear in query results but cannot
//! be used as query parameters.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use thiserror::Error;

use super::ValueReceive;

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Node {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: HashMap<String, ValueReceive>,
    /// Below Bolt 5.0, the server doesn't send element ids; the driver
    /// synthesizes them from the numeric id.
    pub element_id: String,
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Node(labels={:?}, element_id={}, properties={:?})",
            self.labels, self.element_id, self.properties
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Relationship {
    pub id: i64,
    pub start_node_id: i64,
    pub end_node_id: i64,
    pub type_: String,
    pub properties: HashMap<String, ValueReceive>,
    pub element_id: String,
    pub start_node_element_id: String,
    pub end_node_element_id: String,
}

impl Display for Relationship {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Relationship(type={}, element_id={}, \
             start_node_element_id={}, end_node_element_id={}, properties={:?})",
            self.type_,
            self.element_id,
            self.start_node_element_id,
            self.end_node_element_id,
            self.properties
        )
    }
}

/// A relationship without start and end node, as it appears inside a
/// [`Path`]: the nodes are found through the path's indices instead.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct UnboundRelationship {
    pub id: i64,
    pub type_: String,
    pub properties: HashMap<String, ValueReceive>,
    pub element_id: String,
}

/// Represents a path in the graph.
///
/// Paths hold their nodes and relationships in owned lists; `indices`
/// references into those lists (no pointers between entities).
/// Prefer [`Path::traverse()`] over interpreting `indices` by hand.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub relationships: Vec<UnboundRelationship>,
    /// Alternating relationship and node indices.
    /// Odd entries (1st, 3rd, ...) are 1-based relationship indices, negated
    /// when the relationship is traversed against its direction.
    /// Even entries (2nd, 4th, ...) are 0-based node indices.
    pub indices: Vec<isize>,
}

impl Path {
    pub(crate) fn new(
        nodes: Vec<Node>,
        relationships: Vec<UnboundRelationship>,
        indices: Vec<isize>,
    ) -> Result<Self, PathInvariantError> {
        let path = Self {
            nodes,
            relationships,
            indices,
        };
        path.verify_invariants().map(|_| path)
    }

    /// Verifies the invariants of the path:
    ///  * `nodes` is not empty,
    ///  * `indices` has an even number of elements,
    ///  * odd entries are in `-relationships.len()..=-1` or
    ///    `1..=relationships.len()`,
    ///  * even entries are in `0..nodes.len()`.
    pub fn verify_invariants(&self) -> Result<(), PathInvariantError> {
        if self.nodes.is_empty() {
            return Err(PathInvariantError::EmptyNodes {});
        }
        if self.indices.len() % 2 == 1 {
            return Err(PathInvariantError::UnevenIndicesCount {});
        }
        let relationship_count = self.relationships.len();
        let node_count = self.nodes.len();
        if relationship_count >= isize::MAX as usize || node_count > isize::MAX as usize {
            return Err(PathInvariantError::TooManyEntities {});
        }
        for (pair, hop) in self.indices.chunks_exact(2).enumerate() {
            let (relationship_index, node_index) = (hop[0], hop[1]);
            let magnitude = relationship_index.unsigned_abs();
            if magnitude == 0 || magnitude > relationship_count {
                return Err(PathInvariantError::RelationshipIndexOutOfRange {
                    index: 2 * pair,
                    value: relationship_index,
                    relationships_len: relationship_count,
                });
            }
            if node_index < 0 || node_index as usize >= node_count {
                return Err(PathInvariantError::NodeIndexOutOfRange {
                    index: 2 * pair + 1,
                    value: node_index,
                    nodes_len: node_count,
                });
            }
        }
        Ok(())
    }

    /// Returns the start node of the path together with every hop: the
    /// direction in which the relationship is traversed, the relationship,
    /// and the node it leads to.
    ///
    /// # Panics
    /// Panics if the path's fields were mutated in a way that violates the
    /// [invariants](`Path::verify_invariants()`).
    /// Paths received from the database are checked before conversion.
    pub fn traverse(
        &self,
    ) -> (
        &Node,
        Vec<(RelationshipDirection, &UnboundRelationship, &Node)>,
    ) {
        assert!(
            self.indices.len() % 2 == 0,
            "indices must contain an even number of elements"
        );
        let hops = self
            .indices
            .chunks_exact(2)
            .map(|hop| {
                let (relationship_index, node_index) = (hop[0], hop[1]);
                let magnitude = relationship_index.unsigned_abs();
                assert!(magnitude >= 1, "relationship index must not be 0");
                let direction = match relationship_index < 0 {
                    true => RelationshipDirection::From,
                    false => RelationshipDirection::To,
                };
                let relationship = &self.relationships[magnitude - 1];
                let node =
                    &self.nodes[usize::try_from(node_index).expect("node index must be >= 0")];
                (direction, relationship, node)
            })
            .collect();
        (&self.nodes[0], hops)
    }
}

/// Direction in which a relationship is traversed along a [`Path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipDirection {
    /// The relationship points in the direction of travel.
    To,
    /// The relationship points against the direction of travel.
    From,
}

/// Used when the server returned a [`Path`] violating its invariants.
#[derive(Debug, Error)]
pub enum PathInvariantError {
    #[error("paths must contain at least one node")]
    EmptyNodes {},
    #[error("paths must contain an even number of indices")]
    UnevenIndicesCount {},
    #[error("path contains too many nodes or relationships to be addressable")]
    TooManyEntities {},
    #[error(
        "path index {index} (value {value}) is out of range \
         for {relationships_len} relationship(s)"
    )]
    RelationshipIndexOutOfRange {
        index: usize,
        value: isize,
        relationships_len: usize,
    },
    #[error("path index {index} (value {value}) is out of range for {nodes_len} node(s)")]
    NodeIndexOutOfRange {
        index: usize,
        value: isize,
        nodes_len: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64) -> Node {
        Node {
            id,
            labels: vec![],
            properties: HashMap::new(),
            element_id: id.to_string(),
        }
    }

    fn relationship(id: i64) -> UnboundRelationship {
        UnboundRelationship {
            id,
            type_: String::from("KNOWS"),
            properties: HashMap::new(),
            element_id: id.to_string(),
        }
    }

    #[test]
    fn traverse_follows_indices() {
        let path = Path::new(
            vec![node(1), node(2)],
            vec![relationship(10)],
            vec![-1, 1],
        )
        .unwrap();
        let (start, hops) = path.traverse();
        assert_eq!(start.id, 1);
        assert_eq!(hops.len(), 1);
        let (direction, rel, end) = hops[0];
        assert_eq!(direction, RelationshipDirection::From);
        assert_eq!(rel.id, 10);
        assert_eq!(end.id, 2);
    }

    #[test]
    fn invariants_reject_out_of_range_indices() {
        assert!(Path::new(vec![node(1)], vec![], vec![1, 0]).is_err());
        assert!(Path::new(vec![node(1)], vec![relationship(10)], vec![0, 0]).is_err());
        assert!(Path::new(vec![node(1)], vec![relationship(10)], vec![1, 1]).is_err());
        assert!(Path::new(vec![], vec![], vec![]).is_err());
    }
}
