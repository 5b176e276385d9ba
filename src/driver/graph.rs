//! Graph entities: nodes, relationships and paths.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{DriverError, DriverResult};
use super::types::Value;

/// Legacy numeric id reported when the server sends none.
pub const NO_LEGACY_ID: i64 = -1;

// ============================================================================
// Node
// ============================================================================

/// Graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Legacy numeric id
    pub id: i64,
    pub element_id: String,
    pub labels: Vec<String>,
    pub properties: HashMap<String, Value>,
}

impl Node {
    pub fn new(
        id: i64,
        element_id: impl Into<String>,
        labels: Vec<String>,
        properties: HashMap<String, Value>,
    ) -> Self {
        Self {
            id,
            element_id: element_id.into(),
            labels,
            properties,
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Property converted to `T`.
    pub fn get_as<T: TryFrom<Value, Error = DriverError>>(&self, key: &str) -> DriverResult<T> {
        self.properties
            .get(key)
            .cloned()
            .ok_or_else(|| DriverError::NoSuchElement(format!("Property '{}' not found", key)))
            .and_then(T::try_from)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels = if self.labels.is_empty() {
            String::new()
        } else {
            format!(":{}", self.labels.join(":"))
        };
        write!(f, "({}{})", self.element_id, labels)
    }
}

// ============================================================================
// Relationship
// ============================================================================

/// Directed relationship between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: i64,
    pub element_id: String,
    pub start_node_id: i64,
    pub start_node_element_id: String,
    pub end_node_id: i64,
    pub end_node_element_id: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub properties: HashMap<String, Value>,
}

impl Relationship {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Whether this relationship joins `a` and `b`, in either direction.
    pub fn connects(&self, a: &Node, b: &Node) -> bool {
        (self.start_node_element_id == a.element_id && self.end_node_element_id == b.element_id)
            || (self.start_node_element_id == b.element_id && self.end_node_element_id == a.element_id)
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({})-[{}:{}]->({})",
            self.start_node_element_id, self.element_id, self.rel_type, self.end_node_element_id
        )
    }
}

/// Relationship as it appears inside a path, before its direction is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnboundRelationship {
    pub id: i64,
    pub element_id: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub properties: HashMap<String, Value>,
}

impl UnboundRelationship {
    /// Directed copy running from `start` to `end`.
    pub fn bind(&self, start: &Node, end: &Node) -> Relationship {
        Relationship {
            id: self.id,
            element_id: self.element_id.clone(),
            start_node_id: start.id,
            start_node_element_id: start.element_id.clone(),
            end_node_id: end.id,
            end_node_element_id: end.element_id.clone(),
            rel_type: self.rel_type.clone(),
            properties: self.properties.clone(),
        }
    }
}

// ============================================================================
// Path
// ============================================================================

/// One hop of a path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Node,
    pub relationship: Relationship,
    pub end: Node,
}

/// Alternating sequence of nodes and relationships.
///
/// Always holds one more node than segments, and each segment starts where
/// the previous one ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PathParts")]
pub struct Path {
    nodes: Vec<Node>,
    segments: Vec<Segment>,
}

#[derive(Deserialize)]
struct PathParts {
    nodes: Vec<Node>,
    segments: Vec<Segment>,
}

impl TryFrom<PathParts> for Path {
    type Error = DriverError;

    fn try_from(parts: PathParts) -> Result<Self, Self::Error> {
        let relationships = parts.segments.into_iter().map(|s| s.relationship).collect();
        Path::new(parts.nodes, relationships)
    }
}

impl Path {
    /// Build a path from its walk: `nodes[i]` and `nodes[i + 1]` are joined
    /// by `relationships[i]`.
    pub fn new(nodes: Vec<Node>, relationships: Vec<Relationship>) -> DriverResult<Self> {
        if nodes.len() != relationships.len() + 1 {
            return Err(DriverError::invalid_state(format!(
                "A path needs exactly one more node than relationships, got {} nodes and {} relationships",
                nodes.len(),
                relationships.len()
            )));
        }

        let mut segments = Vec::with_capacity(relationships.len());
        for (i, relationship) in relationships.into_iter().enumerate() {
            let (start, end) = (&nodes[i], &nodes[i + 1]);
            if !relationship.connects(start, end) {
                return Err(DriverError::invalid_state(format!(
                    "Relationship {} does not connect {} and {}",
                    relationship.element_id, start.element_id, end.element_id
                )));
            }
            segments.push(Segment {
                start: start.clone(),
                relationship,
                end: end.clone(),
            });
        }

        Ok(Self { nodes, segments })
    }

    /// Path of a single node
    pub fn single(node: Node) -> Self {
        Self {
            nodes: vec![node],
            segments: Vec::new(),
        }
    }

    /// Number of relationships
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn start(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn end(&self) -> &Node {
        &self.nodes[self.nodes.len() - 1]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.segments.iter().map(|s| &s.relationship)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start())?;
        for segment in &self.segments {
            if segment.relationship.start_node_element_id == segment.start.element_id {
                write!(f, "-[:{}]->{}", segment.relationship.rel_type, segment.end)?;
            } else {
                write!(f, "<-[:{}]-{}", segment.relationship.rel_type, segment.end)?;
            }
        }
        Ok(())
    }
}
