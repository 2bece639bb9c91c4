use std::{error::Error, fmt};

use serde::{Deserialize, Serialize};

/// The position of a node among its peers.
///
/// Always satisfies `node_index < total_nodes`, the only way of building one is
/// through `NodeIdentity::new` (deserialization goes through it as well).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawIdentity")]
pub struct NodeIdentity {
    node_index: u32,
    total_nodes: u32,
}

#[derive(Deserialize)]
struct RawIdentity {
    node_index: u32,
    total_nodes: u32,
}

impl NodeIdentity {
    /// Creates a new `NodeIdentity`.
    ///
    /// # Arguments
    /// * `node_index` - The zero based index of this node.
    /// * `total_nodes` - The amount of peer nodes, this one included.
    ///
    /// # Returns
    /// The identity or `InvalidIdentity` if `node_index >= total_nodes`.
    pub fn new(node_index: u32, total_nodes: u32) -> Result<Self, InvalidIdentity> {
        if total_nodes == 0 || node_index >= total_nodes {
            return Err(InvalidIdentity {
                node_index,
                total_nodes,
            });
        }

        Ok(Self {
            node_index,
            total_nodes,
        })
    }

    pub fn node_index(&self) -> u32 {
        self.node_index
    }

    pub fn total_nodes(&self) -> u32 {
        self.total_nodes
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_index, self.total_nodes)
    }
}

impl TryFrom<RawIdentity> for NodeIdentity {
    type Error = InvalidIdentity;

    fn try_from(raw: RawIdentity) -> Result<Self, Self::Error> {
        Self::new(raw.node_index, raw.total_nodes)
    }
}

/// Returned when a node index does not fit in the declared amount of nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidIdentity {
    pub node_index: u32,
    pub total_nodes: u32,
}

impl fmt::Display for InvalidIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node index {} must be within [0, {})",
            self.node_index, self.total_nodes
        )
    }
}

impl Error for InvalidIdentity {}
