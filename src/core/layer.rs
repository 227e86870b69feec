use std::time::Instant;

use tracing::{debug, trace};

use crate::error::{NetError, NetResult};
use crate::fixed::{Count, Pulse, Rc, Token};
use crate::middle::DIM;
use crate::network::{Cx, Net, NetClass, NetId, NetKind, Network, Neuron};

/// Ordered container of child networks.
#[derive(Debug, Default)]
pub struct Layer {
    children: Vec<NetId>,
    input: Option<NetId>,
    output: Option<NetId>,
    clock: u64,
    clock_time: Option<Instant>,
}

impl Layer {
    pub fn children(&self) -> &[NetId] {
        &self.children
    }

    /// First inserted child.
    pub fn input(&self) -> Option<NetId> {
        self.input
    }

    /// Last inserted child.
    pub fn output(&self) -> Option<NetId> {
        self.output
    }

    /// Number of `update()` calls seen.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn clock_time(&self) -> Option<Instant> {
        self.clock_time
    }

    pub(crate) fn push(&mut self, id: NetId) {
        if self.input.is_none() {
            self.input = Some(id);
        }
        self.output = Some(id);
        self.children.push(id);
    }

    fn tick(&mut self) {
        self.clock += 1;
        self.clock_time = Some(Instant::now());
    }

    pub(crate) fn route_fanin(&self, cx: Cx<'_>, token: Token, pulse: Pulse) -> NetResult<Rc> {
        let leaf = cx.net.locate(cx.id, token)?;
        cx.net.fanin(leaf, token, pulse)
    }

    /// Split `[token, token + count)` across the children that own it.
    pub(crate) fn route_fanout(&self, cx: Cx<'_>, token: Token, count: Count) -> NetResult<Rc> {
        let verbose = cx.verbose();
        if verbose {
            trace!(">> {}.fanout({:#x}, {:#x})", cx.net.describe(cx.id), token, count);
        }
        if !cx.base.contains_range(token, count) {
            return Err(NetError::Lookup { token });
        }

        let mut rc = 0;
        let mut next = token;
        let mut remaining = count;
        for &child in &self.children {
            if remaining == 0 {
                break;
            }
            let base = cx.net.base(child)?;
            if !base.contains(next) {
                continue;
            }
            let sub = remaining.min(base.ending() - next);
            rc += cx.net.fanout(child, next, sub)?;
            next += sub;
            remaining -= sub;
        }
        if remaining != 0 {
            return Err(NetError::Lookup { token: next });
        }

        if verbose {
            trace!(
                "<< {}.fanout: {} fanins for {} tokens",
                cx.net.describe(cx.id),
                rc,
                count
            );
        }
        Ok(rc)
    }
}

impl Neuron for Layer {
    fn class_name(&self) -> &'static str {
        "Layer"
    }

    fn fanin(&self, cx: Cx<'_>, token: Token, pulse: Pulse) -> NetResult<Rc> {
        self.route_fanin(cx, token, pulse)
    }

    fn fanout(&self, cx: Cx<'_>, token: Token, count: Count) -> NetResult<Rc> {
        self.route_fanout(cx, token, count)
    }
}

fn needs_middle(class: &'static str, parent: &'static str) -> NetError {
    NetError::construction(format!("{class} must be inserted into a MiddleLayer, not a {parent}"))
}

fn below_floor(class: &'static str, length: Count) -> NetError {
    NetError::construction(format!("{class} length {length} is below the bundle size {DIM}"))
}

impl Net {
    pub fn layer(&self, id: NetId) -> NetResult<&Layer> {
        let node = self.node(id)?;
        node.kind
            .layer()
            .ok_or(NetError::not_implemented(node.class_name(), "children"))
    }

    fn child_at(&self, id: NetId, i: usize) -> NetResult<NetId> {
        self.layer(id)?
            .children
            .get(i)
            .copied()
            .ok_or(NetError::ShouldNotOccur("child index out of range"))
    }

    /// Append `network` to the container `parent`.
    ///
    /// Flyweights register their storage needs with the parent MiddleLayer
    /// here; after the parent is built the tree is frozen.
    pub fn insert_layer(&mut self, parent: NetId, mut network: Network) -> NetResult<NetId> {
        let id = NetId(self.node_count());
        let length = network.base.length();
        let class = network.class_name();
        let parent_node = self.node_mut(parent)?;
        let parent_class = parent_node.class_name();
        if parent_node.base.is_built() {
            return Err(NetError::construction(format!(
                "cannot insert {class} into {parent_class} {parent} after build"
            )));
        }
        if parent_node.kind.layer().is_none() {
            return Err(NetError::not_implemented(parent_class, "insert_layer"));
        }
        if network.base.is_built() {
            return Err(NetError::construction(format!("{class} is already built")));
        }

        match &mut network.kind {
            NetKind::Fanout(n) => {
                if length < DIM {
                    return Err(below_floor(class, length));
                }
                let middle = parent_node
                    .kind
                    .middle_mut()
                    .ok_or_else(|| needs_middle(class, parent_class))?;
                n.register(parent, middle.register_fanout(length));
            }
            NetKind::Faninp(n) => {
                if length < DIM {
                    return Err(below_floor(class, length));
                }
                let middle = parent_node
                    .kind
                    .middle_mut()
                    .ok_or_else(|| needs_middle(class, parent_class))?;
                let (bundle_index, weight_index) = middle.register_faninp(length);
                n.register(parent, bundle_index, weight_index);
            }
            NetKind::OutBuffer(n) => {
                let middle = parent_node
                    .kind
                    .middle_mut()
                    .ok_or_else(|| needs_middle(class, parent_class))?;
                n.register(parent, middle.register_out_buffer(length));
            }
            _ => {}
        }

        if let Some(layer) = parent_node.kind.layer_mut() {
            layer.push(id);
        }
        network.owner = Some(parent);
        self.push_node(network);
        debug!("insert {} {} into {}", class, id, self.describe(parent));
        Ok(id)
    }

    /// Length a network will claim when built.
    pub fn build_length(&self, id: NetId) -> NetResult<Count> {
        let node = self.node(id)?;
        match node.kind.layer() {
            Some(layer) => {
                let mut total: Count = 0;
                for &child in &layer.children {
                    total += self.build_length(child)?;
                }
                Ok(total)
            }
            None => Ok(node.base.length()),
        }
    }

    pub(crate) fn build_layer(&mut self, id: NetId, origin: Token) -> NetResult<Count> {
        let total = self.build_length(id)?;
        self.node_mut(id)?.base.begin_container(origin, total)?;
        debug!("{}.build begin ({:#x} tokens)", self.describe(id), total);

        let count = self.layer(id)?.children.len();
        let mut next = origin;
        let mut length: Count = 0;
        for i in 0..count {
            let child = self.child_at(id, i)?;
            let claimed = self.build(child, next)?;
            next += claimed;
            length += claimed;
        }
        if length != total {
            return Err(NetError::ShouldNotOccur("layer length differs from build_length"));
        }

        let node = self.node_mut(id)?;
        node.base.finish_container(length);
        if let Some(middle) = node.kind.middle_mut() {
            let bytes = middle.allocate()?.byte_size();
            debug!("{}.build allocated {} bytes", self.describe(id), bytes);
        }
        debug!("{}.build end", self.describe(id));
        Ok(length)
    }

    /// Pre-build lookup of the child that will own `token`.
    ///
    /// Uses cumulative `build_length` from the container's origin, since
    /// later siblings have no origin yet. Out-of-range tokens go to the
    /// owner; the top Layer has none and fails the lookup.
    pub fn build_locate(&self, id: NetId, token: Token) -> NetResult<NetId> {
        let node = self.node(id)?;
        let Some(layer) = node.kind.layer() else {
            return Err(NetError::not_implemented(node.class_name(), "build_locate"));
        };
        if !node.base.contains(token) {
            return match node.owner {
                Some(owner) => self.build_locate(owner, token),
                None => Err(NetError::Lookup { token }),
            };
        }
        let mut start = node.base.origin();
        for &child in &layer.children {
            let end = start + self.build_length(child)?;
            if token >= start && token < end {
                return Ok(child);
            }
            start = end;
        }
        Err(NetError::Lookup { token })
    }

    /// Post-build lookup of the leaf owning `token`.
    pub fn locate(&self, id: NetId, token: Token) -> NetResult<NetId> {
        let node = self.node(id)?;
        let Some(layer) = node.kind.layer() else {
            return Err(NetError::not_implemented(node.class_name(), "locate"));
        };
        if !node.base.contains(token) {
            return match node.owner {
                Some(owner) => self.locate(owner, token),
                None => Err(NetError::Lookup { token }),
            };
        }
        for &child in &layer.children {
            let child_node = self.node(child)?;
            if child_node.base.contains(token) {
                return if child_node.is_container() {
                    self.locate(child, token)
                } else {
                    Ok(child)
                };
            }
        }
        Err(NetError::Lookup { token })
    }

    pub(crate) fn build_update_layer(&mut self, id: NetId, pass: u32) -> NetResult<bool> {
        if let Some(middle) = self.node(id)?.kind.middle() {
            if middle.storage().is_none() {
                return Err(NetError::ShouldNotOccur("MiddleLayer settled before build"));
            }
        }
        let count = self.layer(id)?.children.len();
        let mut again = false;
        let mut charge: Count = 0;
        for i in 0..count {
            let child = self.child_at(id, i)?;
            let more = self.build_update(child, pass)?;
            again |= more;
            charge += self.work_charge(child)?;
        }
        self.node_mut(id)?.base.set_charge(charge);
        debug!(
            "{}.build_update({}) again={} charge={}",
            self.describe(id),
            pass,
            again,
            charge
        );
        Ok(again)
    }

    pub(crate) fn update_layer(&mut self, id: NetId) -> NetResult<()> {
        let node = self.node_mut(id)?;
        if let Some(middle) = node.kind.middle_mut() {
            middle.swap()?;
        }
        if let Some(layer) = node.kind.layer_mut() {
            layer.tick();
        }
        let count = self.layer(id)?.children.len();
        for i in 0..count {
            let child = self.child_at(id, i)?;
            self.update(child)?;
        }
        Ok(())
    }

    /// Containers in the subtree of `id`, depth-first.
    pub fn containers(&self, id: NetId) -> NetResult<Vec<NetId>> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(layer) = self.node(next)?.kind.layer() {
                out.push(next);
                stack.extend(layer.children.iter().rev());
            }
        }
        Ok(out)
    }

    pub fn class_of(&self, id: NetId) -> NetResult<NetClass> {
        Ok(self.node(id)?.kind.class())
    }
}
