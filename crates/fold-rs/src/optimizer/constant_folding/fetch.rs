use crate::graph::{Graph, NodeBuilder, NodeId, NodeOut};
use crate::runtime::{create_key, DeviceAttributes};

use super::FoldError;

/// A `_Send` node attached to one boundary output of the isolated graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchNode {
    pub node: NodeId,
    /// `"name:port"` of the fetched output.
    pub tensor_name: String,
    /// Rendezvous key the value is published under.
    pub key: String,
}

/// Attaches a `_Send` to each output, in order.
///
/// Every output is resolved before the graph is touched, so a missing node or
/// port leaves `graph` unchanged. Each send also gets a control edge to SINK.
pub fn attach_fetches(
    graph: &mut Graph,
    device: &DeviceAttributes,
    outputs: &[NodeOut],
) -> Result<Vec<FetchNode>, FoldError> {
    let mut resolved = Vec::with_capacity(outputs.len());
    for out in outputs {
        let node = graph
            .node(out.node)
            .filter(|node| out.index < node.num_outputs())
            .ok_or_else(|| FoldError::UnknownFetch {
                name: format!("{}:{}", out.node, out.index),
            })?;
        let tensor_name = format!("{}:{}", node.name(), out.index);
        resolved.push((*out, node.name().replace('/', "_"), tensor_name));
    }

    let mut fetches = Vec::with_capacity(resolved.len());
    for (out, flat_name, tensor_name) in resolved {
        let mut send_name = format!("_send_{flat_name}_{}", out.index);
        if graph.find_node(&send_name).is_some() {
            send_name = graph.new_name(&send_name);
        }
        let send = NodeBuilder::new(send_name, "_Send")
            .input(out)
            .attr("tensor_name", tensor_name.as_str())
            .attr("send_device", device.name.as_str())
            .attr("send_device_incarnation", device.incarnation as i64)
            .attr("recv_device", device.name.as_str())
            .attr("client_terminated", true)
            .finalize(graph)?;
        graph.add_control_edge(send, Graph::SINK)?;
        let key = create_key(&device.name, device.incarnation, &device.name, &tensor_name);
        fetches.push(FetchNode {
            node: send,
            tensor_name,
            key,
        });
    }
    Ok(fetches)
}
