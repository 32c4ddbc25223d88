use serde::{Deserialize, Serialize};

use super::node::NodeId;

/// Port value reserved for ordering-only edges that carry no data.
pub const CONTROL_SLOT: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

/// Directed dependency `src:src_output -> dst:dst_input`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub(super) id: EdgeId,
    pub(super) src: NodeId,
    pub(super) src_output: i32,
    pub(super) dst: NodeId,
    pub(super) dst_input: i32,
}

impl Edge {
    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn src(&self) -> NodeId {
        self.src
    }

    pub fn src_output(&self) -> i32 {
        self.src_output
    }

    pub fn dst(&self) -> NodeId {
        self.dst
    }

    pub fn dst_input(&self) -> i32 {
        self.dst_input
    }

    pub fn is_control(&self) -> bool {
        self.src_output == CONTROL_SLOT
    }
}
