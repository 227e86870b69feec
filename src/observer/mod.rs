use std::sync::atomic::Ordering;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::error::NetResult;
use crate::middle::MiddleLayout;
use crate::network::NetId;
use crate::root::Root;

/// A read-only snapshot of a network tree.
///
/// Design intent:
/// - Observers cannot mutate or steer the network.
/// - Snapshotting is *on-demand* and can allocate; the clock loop stays unchanged.
/// - Values are read from the stable (getter) half only.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct NetSnapshot {
    pub cycle: u64,
    pub tokens: usize,
    pub nodes: Vec<NodeSnapshot>,
    pub middles: Vec<MiddleSnapshot>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct NodeSnapshot {
    pub id: usize,
    pub parent: Option<usize>,
    pub depth: usize,
    pub class: &'static str,
    pub origin: usize,
    pub ending: usize,
    pub length: usize,
    pub work_charge: usize,
    /// Update count, for containers.
    pub clock: Option<u64>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct MiddleSnapshot {
    pub id: usize,
    pub name: String,
    pub fanout_length: usize,
    pub bundle_length: usize,
    pub getset_length: usize,
    pub weight_length: usize,
    pub layout: MiddleLayout,
    pub storage_bytes: usize,
    /// Non-zero cells in the stable half.
    pub active_values: usize,
}

pub struct NetAdapter<'a> {
    root: &'a Root,
}

impl<'a> NetAdapter<'a> {
    pub fn new(root: &'a Root) -> Self {
        Self { root }
    }

    pub fn snapshot(&self) -> NetResult<NetSnapshot> {
        let net = self.root.net();
        let top = net.top();
        let mut nodes = Vec::with_capacity(net.node_count());
        let mut middles = Vec::new();

        let mut stack: Vec<(NetId, usize)> = vec![(top, 0)];
        while let Some((id, depth)) = stack.pop() {
            let node = net.node(id)?;
            let base = node.base();
            let layer = node.kind().layer();
            nodes.push(NodeSnapshot {
                id: id.index(),
                parent: node.owner().map(NetId::index),
                depth,
                class: node.class_name(),
                origin: base.origin(),
                ending: base.ending(),
                length: base.length(),
                work_charge: base.work_charge(),
                clock: layer.map(|l| l.clock()),
            });

            if let Some(middle) = node.kind().middle() {
                let (storage_bytes, active_values) = match middle.storage() {
                    Some(storage) => (
                        storage.byte_size(),
                        storage
                            .values()
                            .getter()
                            .iter()
                            .filter(|c| c.load(Ordering::Relaxed) != 0)
                            .count(),
                    ),
                    None => (0, 0),
                };
                middles.push(MiddleSnapshot {
                    id: id.index(),
                    name: middle.name().to_string(),
                    fanout_length: middle.fanout_length(),
                    bundle_length: middle.bundle_length(),
                    getset_length: middle.getset_length(),
                    weight_length: middle.weight_length(),
                    layout: middle.layout(),
                    storage_bytes,
                    active_values,
                });
            }

            if let Some(layer) = layer {
                for &child in layer.children().iter().rev() {
                    stack.push((child, depth + 1));
                }
            }
        }

        Ok(NetSnapshot {
            cycle: self.root.cycle(),
            tokens: net.base(top)?.length(),
            nodes,
            middles,
        })
    }
}

impl NetSnapshot {
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> NetResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Nodes of the given class, in tree order.
    pub fn of_class<'s>(&'s self, class: &'s str) -> impl Iterator<Item = &'s NodeSnapshot> + 's {
        self.nodes.iter().filter(move |n| n.class == class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;
    use crate::network::Network;

    #[test]
    fn snapshot_walks_tree_in_order() {
        let mut root = Root::new(NetConfig::default().with_threads(1)).unwrap();
        let top = root.top();
        let m = root.insert_layer(top, Network::middle("m")).unwrap();
        let f = root.insert_layer(m, Network::fanout(8)).unwrap();
        root.insert_layer(m, Network::out_buffer(8)).unwrap();
        root.insert_layer(top, Network::leaf(3)).unwrap();
        root.build(0).unwrap();
        root.settle().unwrap();
        root.net().fanin(f, 1, 9).unwrap();
        root.update().unwrap();

        let snap = NetAdapter::new(&root).snapshot().unwrap();
        assert_eq!(snap.cycle, 1);
        assert_eq!(snap.tokens, 19);
        let classes: Vec<_> = snap.nodes.iter().map(|n| (n.class, n.depth)).collect();
        assert_eq!(
            classes,
            vec![
                ("Layer", 0),
                ("MiddleLayer", 1),
                ("FanoutNeuron", 2),
                ("OutBuffer", 2),
                ("Network", 1),
            ]
        );
        assert_eq!(snap.nodes[0].clock, Some(1));
        assert_eq!(snap.of_class("OutBuffer").count(), 1);

        let middle = &snap.middles[0];
        assert_eq!(middle.fanout_length, 8);
        assert_eq!(middle.getset_length, 8);
        assert_eq!(middle.active_values, 1);
        assert!(middle.storage_bytes > 0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn snapshot_serializes() {
        let root = Root::new(NetConfig::default()).unwrap();
        let json = NetAdapter::new(&root).snapshot().unwrap().to_json().unwrap();
        assert!(json.contains("\"class\": \"Layer\""));
    }
}
