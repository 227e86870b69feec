//! The network tree: an arena of [`Network`] nodes addressed by [`NetId`].
//!
//! Every node owns a contiguous token range once built. Containers
//! ([`Layer`], [`MiddleLayer`]) route calls to the child owning a token;
//! leaves implement the runtime surface through the [`Neuron`] trait.

use std::fmt;

use tracing::debug;

use crate::buffer::ValueView;
use crate::config::{NetConfig, NetContext};
use crate::error::{NetError, NetResult};
use crate::fixed::{Count, Pulse, Rc, Token, Value, Weight};
use crate::layer::Layer;
use crate::middle::MiddleLayer;
use crate::neuron::{FaninpNeuron, FanoutNeuron, OutBuffer};
use crate::video::{VideoInp, VideoOut, VideoSource};

/// Index of a node in the [`Net`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetId(pub(crate) usize);

impl NetId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Token range and work charge shared by every network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetBase {
    origin: Token,
    length: Count,
    ending: Token,
    charge: Count,
    built: bool,
}

impl NetBase {
    pub fn new(length: Count) -> Self {
        Self {
            origin: 0,
            length,
            ending: 0,
            charge: length.max(1),
            built: false,
        }
    }

    #[inline]
    pub fn origin(&self) -> Token {
        self.origin
    }

    #[inline]
    pub fn length(&self) -> Count {
        self.length
    }

    #[inline]
    pub fn ending(&self) -> Token {
        self.ending
    }

    #[inline]
    pub fn work_charge(&self) -> Count {
        self.charge
    }

    #[inline]
    pub fn is_built(&self) -> bool {
        self.built
    }

    #[inline]
    pub fn contains(&self, token: Token) -> bool {
        token >= self.origin && token < self.ending
    }

    /// True when `[token, token + count)` lies inside this range.
    /// An empty range may sit exactly at `ending`.
    pub fn contains_range(&self, token: Token, count: Count) -> bool {
        if count == 0 {
            return token >= self.origin && token <= self.ending;
        }
        token >= self.origin
            && token
                .checked_add(count)
                .is_some_and(|end| end <= self.ending)
    }

    /// Fix a leaf's range. Ranges are assigned once.
    pub(crate) fn assign(&mut self, origin: Token) -> NetResult<Count> {
        if self.built {
            return Err(NetError::ShouldNotOccur("network built twice"));
        }
        self.origin = origin;
        self.ending = origin
            .checked_add(self.length)
            .ok_or(NetError::ShouldNotOccur("token space overflow"))?;
        self.built = true;
        Ok(self.length)
    }

    /// Fix a container's range ahead of building its children, so they can
    /// query the container's bounds while they build.
    pub(crate) fn begin_container(&mut self, origin: Token, build_length: Count) -> NetResult<()> {
        if self.built {
            return Err(NetError::ShouldNotOccur("layer built twice"));
        }
        self.origin = origin;
        self.ending = origin
            .checked_add(build_length)
            .ok_or(NetError::ShouldNotOccur("token space overflow"))?;
        self.built = true;
        Ok(())
    }

    pub(crate) fn finish_container(&mut self, length: Count) {
        self.length = length;
    }

    pub(crate) fn set_charge(&mut self, charge: Count) {
        self.charge = charge.max(1);
    }
}

/// Call context handed to [`Neuron`] methods.
#[derive(Clone, Copy)]
pub struct Cx<'a> {
    pub net: &'a Net,
    pub id: NetId,
    pub base: &'a NetBase,
}

impl Cx<'_> {
    /// Offset of `token` inside this network, or a lookup failure.
    #[inline]
    pub fn offset(&self, token: Token) -> NetResult<usize> {
        if self.base.contains(token) {
            Ok(token - self.base.origin())
        } else {
            Err(NetError::Lookup { token })
        }
    }

    #[inline]
    pub fn verbose(&self) -> bool {
        self.net.verbose() > 0
    }
}

/// Runtime surface of a network. The defaults are the inert leaf behavior.
pub trait Neuron: Send + Sync {
    fn class_name(&self) -> &'static str;

    /// Accumulate `pulse` for `token`; returns the acknowledgment count.
    fn fanin(&self, cx: Cx<'_>, token: Token, pulse: Pulse) -> NetResult<Rc> {
        let _ = (cx, token, pulse);
        Ok(1)
    }

    /// Push this cycle's signal for `[token, token + count)` downstream.
    fn fanout(&self, cx: Cx<'_>, token: Token, count: Count) -> NetResult<Rc> {
        let _ = (cx, token, count);
        Ok(0)
    }

    fn to_value(&self, cx: Cx<'_>, token: Token) -> NetResult<Value> {
        let _ = (cx, token);
        Err(NetError::not_implemented(self.class_name(), "to_value"))
    }

    /// Stable view of every value this network exposes, indexed from `origin`.
    fn to_values<'a>(&'a self, cx: Cx<'a>) -> NetResult<ValueView<'a>> {
        let _ = cx;
        Err(NetError::not_implemented(self.class_name(), "to_values"))
    }
}

/// Read one token through a network's value view.
pub(crate) fn value_at(view: ValueView<'_>, cx: Cx<'_>, token: Token) -> NetResult<Value> {
    let offset = cx.offset(token)?;
    view.get(offset)
        .ok_or(NetError::ShouldNotOccur("value view shorter than network"))
}

/// A plain token range with inert behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct Leaf;

impl Neuron for Leaf {
    fn class_name(&self) -> &'static str {
        "Network"
    }
}

/// Closed set of network variants.
#[derive(Debug)]
pub enum NetKind {
    Leaf(Leaf),
    Layer(Layer),
    Middle(MiddleLayer),
    Fanout(FanoutNeuron),
    Faninp(FaninpNeuron),
    OutBuffer(OutBuffer),
    VideoInp(VideoInp),
    VideoOut(VideoOut),
}

/// Discriminant of [`NetKind`], copied out before mutating dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetClass {
    Leaf,
    Layer,
    Middle,
    Fanout,
    Faninp,
    OutBuffer,
    VideoInp,
    VideoOut,
}

impl NetKind {
    pub fn class(&self) -> NetClass {
        match self {
            NetKind::Leaf(_) => NetClass::Leaf,
            NetKind::Layer(_) => NetClass::Layer,
            NetKind::Middle(_) => NetClass::Middle,
            NetKind::Fanout(_) => NetClass::Fanout,
            NetKind::Faninp(_) => NetClass::Faninp,
            NetKind::OutBuffer(_) => NetClass::OutBuffer,
            NetKind::VideoInp(_) => NetClass::VideoInp,
            NetKind::VideoOut(_) => NetClass::VideoOut,
        }
    }

    pub fn neuron(&self) -> &dyn Neuron {
        match self {
            NetKind::Leaf(n) => n,
            NetKind::Layer(n) => n,
            NetKind::Middle(n) => n,
            NetKind::Fanout(n) => n,
            NetKind::Faninp(n) => n,
            NetKind::OutBuffer(n) => n,
            NetKind::VideoInp(n) => n,
            NetKind::VideoOut(n) => n,
        }
    }

    /// The container part of a Layer or MiddleLayer.
    pub fn layer(&self) -> Option<&Layer> {
        match self {
            NetKind::Layer(l) => Some(l),
            NetKind::Middle(m) => Some(m.layer()),
            _ => None,
        }
    }

    pub(crate) fn layer_mut(&mut self) -> Option<&mut Layer> {
        match self {
            NetKind::Layer(l) => Some(l),
            NetKind::Middle(m) => Some(&mut m.layer),
            _ => None,
        }
    }

    pub fn middle(&self) -> Option<&MiddleLayer> {
        match self {
            NetKind::Middle(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn middle_mut(&mut self) -> Option<&mut MiddleLayer> {
        match self {
            NetKind::Middle(m) => Some(m),
            _ => None,
        }
    }
}

/// One node of the tree: its range, its owner, and its variant.
#[derive(Debug)]
pub struct Network {
    pub(crate) base: NetBase,
    pub(crate) owner: Option<NetId>,
    pub(crate) kind: NetKind,
}

impl Network {
    fn with_kind(length: Count, kind: NetKind) -> Self {
        Self {
            base: NetBase::new(length),
            owner: None,
            kind,
        }
    }

    /// An inert range of `length` tokens.
    pub fn leaf(length: Count) -> Self {
        Self::with_kind(length, NetKind::Leaf(Leaf))
    }

    pub fn layer() -> Self {
        Self::with_kind(0, NetKind::Layer(Layer::default()))
    }

    pub fn middle(name: impl Into<String>) -> Self {
        Self::with_kind(0, NetKind::Middle(MiddleLayer::new(name)))
    }

    pub fn fanout(length: Count) -> Self {
        Self::with_kind(length, NetKind::Fanout(FanoutNeuron::default()))
    }

    pub fn faninp(length: Count) -> Self {
        Self::with_kind(length, NetKind::Faninp(FaninpNeuron::default()))
    }

    pub fn out_buffer(length: Count) -> Self {
        Self::with_kind(length, NetKind::OutBuffer(OutBuffer::default()))
    }

    /// A `width` x `height` frame input, one token per pixel.
    pub fn video_inp(
        width: Count,
        height: Count,
        source: impl VideoSource + 'static,
    ) -> NetResult<Self> {
        let video = VideoInp::new(width, height, Box::new(source))?;
        Ok(Self::with_kind(video.area(), NetKind::VideoInp(video)))
    }

    pub fn video_out(width: Count, height: Count) -> NetResult<Self> {
        let video = VideoOut::new(width, height)?;
        Ok(Self::with_kind(video.area(), NetKind::VideoOut(video)))
    }

    #[inline]
    pub fn base(&self) -> &NetBase {
        &self.base
    }

    #[inline]
    pub fn owner(&self) -> Option<NetId> {
        self.owner
    }

    #[inline]
    pub fn kind(&self) -> &NetKind {
        &self.kind
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.neuron().class_name()
    }

    pub fn is_container(&self) -> bool {
        self.kind.layer().is_some()
    }
}

/// Edge parameters used when bundles are first wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Wiring {
    pub live_edges: usize,
    pub weight_min: Weight,
    pub weight_max: Weight,
}

/// Arena owning every network of one tree. Node 0 is the top Layer.
#[derive(Debug)]
pub struct Net {
    nodes: Vec<Network>,
    context: NetContext,
    pub(crate) wiring: Wiring,
    seed: u64,
}

const TOP: NetId = NetId(0);

impl Net {
    pub fn new(cfg: &NetConfig) -> Self {
        Self {
            nodes: vec![Network::layer()],
            context: NetContext::new(cfg.verbose),
            wiring: Wiring {
                live_edges: cfg.live_edges,
                weight_min: cfg.edge_weight_min,
                weight_max: cfg.edge_weight_max,
            },
            seed: cfg.seed_or_default(),
        }
    }

    #[inline]
    pub fn top(&self) -> NetId {
        TOP
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = NetId> + '_ {
        (0..self.nodes.len()).map(NetId)
    }

    pub fn context(&self) -> &NetContext {
        &self.context
    }

    #[inline]
    pub fn verbose(&self) -> u8 {
        self.context.verbose()
    }

    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn node(&self, id: NetId) -> NetResult<&Network> {
        self.nodes
            .get(id.0)
            .ok_or(NetError::ShouldNotOccur("unknown network id"))
    }

    pub(crate) fn node_mut(&mut self, id: NetId) -> NetResult<&mut Network> {
        self.nodes
            .get_mut(id.0)
            .ok_or(NetError::ShouldNotOccur("unknown network id"))
    }

    pub(crate) fn push_node(&mut self, network: Network) {
        self.nodes.push(network);
    }

    pub fn base(&self, id: NetId) -> NetResult<&NetBase> {
        Ok(&self.node(id)?.base)
    }

    pub fn work_charge(&self, id: NetId) -> NetResult<Count> {
        Ok(self.base(id)?.work_charge())
    }

    /// Clock of the top Layer: the number of completed cycles.
    pub fn clock(&self) -> u64 {
        self.nodes
            .first()
            .and_then(|n| n.kind.layer())
            .map_or(0, Layer::clock)
    }

    fn dispatch(&self, id: NetId) -> NetResult<(Cx<'_>, &dyn Neuron)> {
        let node = self.node(id)?;
        let cx = Cx {
            net: self,
            id,
            base: &node.base,
        };
        Ok((cx, node.kind.neuron()))
    }

    pub fn fanin(&self, id: NetId, token: Token, pulse: Pulse) -> NetResult<Rc> {
        let (cx, neuron) = self.dispatch(id)?;
        neuron.fanin(cx, token, pulse)
    }

    pub fn fanout(&self, id: NetId, token: Token, count: Count) -> NetResult<Rc> {
        let (cx, neuron) = self.dispatch(id)?;
        neuron.fanout(cx, token, count)
    }

    pub fn to_value(&self, id: NetId, token: Token) -> NetResult<Value> {
        let (cx, neuron) = self.dispatch(id)?;
        neuron.to_value(cx, token)
    }

    pub fn to_values(&self, id: NetId) -> NetResult<ValueView<'_>> {
        let (cx, neuron) = self.dispatch(id)?;
        neuron.to_values(cx)
    }

    /// Assign token ranges from `origin`; returns the length claimed.
    pub fn build(&mut self, id: NetId, origin: Token) -> NetResult<Count> {
        let class = self.node(id)?.kind.class();
        if matches!(class, NetClass::Layer | NetClass::Middle) {
            return self.build_layer(id, origin);
        }
        let length = self.node_mut(id)?.base.assign(origin)?;
        match class {
            NetClass::Fanout => self.build_fanout(id)?,
            NetClass::Faninp => self.build_faninp(id)?,
            NetClass::OutBuffer => self.build_out_buffer(id)?,
            NetClass::VideoInp => self.build_video_inp(id)?,
            _ => {}
        }
        debug!("{}.build", self.describe(id));
        Ok(length)
    }

    /// One settle pass. Returns true while another pass is needed.
    pub fn build_update(&mut self, id: NetId, pass: u32) -> NetResult<bool> {
        match self.node(id)?.kind.class() {
            NetClass::Layer | NetClass::Middle => self.build_update_layer(id, pass),
            class @ (NetClass::Fanout | NetClass::Faninp) => {
                match pass {
                    0 => {
                        self.resolve_flyweight(id)?;
                        if class == NetClass::Faninp {
                            self.check_faninp_source(id)?;
                        }
                        Ok(true)
                    }
                    1 => {
                        self.wire_bundles(id)?;
                        Ok(false)
                    }
                    _ => Ok(false),
                }
            }
            NetClass::OutBuffer => {
                self.resolve_flyweight(id)?;
                Ok(false)
            }
            NetClass::VideoInp => {
                if pass == 0 {
                    self.advance_video_inp(id)?;
                }
                Ok(false)
            }
            NetClass::Leaf | NetClass::VideoOut => Ok(false),
        }
    }

    /// Per-cycle hook, run after every fanout of the cycle has joined.
    pub fn update(&mut self, id: NetId) -> NetResult<()> {
        match self.node(id)?.kind.class() {
            NetClass::Layer | NetClass::Middle => self.update_layer(id),
            NetClass::Fanout | NetClass::Faninp | NetClass::OutBuffer => {
                self.resolve_flyweight(id)
            }
            NetClass::VideoInp => self.advance_video_inp(id),
            NetClass::VideoOut => {
                if let NetKind::VideoOut(v) = &mut self.node_mut(id)?.kind {
                    v.swap();
                }
                Ok(())
            }
            NetClass::Leaf => Ok(()),
        }
    }

    /// `NN(id) [origin::ending].length Class`
    pub fn describe(&self, id: NetId) -> String {
        match self.node(id) {
            Ok(node) => format!(
                "NN({:>4}) [{:#010x}::{:#010x}].{:#06x} {}",
                id.0,
                node.base.origin,
                node.base.ending,
                node.base.length,
                node.class_name()
            ),
            Err(_) => format!("NN({:>4}) <unknown>", id.0),
        }
    }

    /// Log every node depth-first at debug level, with MiddleLayer layouts.
    pub fn log_tree(&self) {
        let mut stack = vec![(TOP, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Ok(node) = self.node(id) else { continue };
            debug!("{:indent$}{}", "", self.describe(id), indent = depth * 2);
            if let Some(middle) = node.kind.middle() {
                let layout = middle.layout();
                debug!(
                    "{:indent$}  layout {:?} ({} bytes, {} per fanout token, {} per faninp token)",
                    "",
                    layout,
                    layout.byte_size(),
                    crate::middle::MiddleLayout::PER_FANOUT_TOKEN,
                    crate::middle::MiddleLayout::PER_FANINP_TOKEN,
                    indent = depth * 2
                );
            }
            if let Some(layer) = node.kind.layer() {
                for &child in layer.children().iter().rev() {
                    stack.push((child, depth + 1));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_sets_range() {
        for origin in [0, 1, 17, 4096] {
            let mut base = NetBase::new(12);
            assert_eq!(base.assign(origin).unwrap(), 12);
            assert_eq!(base.origin(), origin);
            assert_eq!(base.ending(), origin + 12);
            assert!(base.assign(origin).is_err());
        }
    }

    #[test]
    fn range_predicates() {
        let mut base = NetBase::new(4);
        base.assign(8).unwrap();
        assert!(base.contains(8));
        assert!(base.contains(11));
        assert!(!base.contains(12));
        assert!(!base.contains(7));

        assert!(base.contains_range(8, 4));
        assert!(!base.contains_range(9, 4));
        assert!(base.contains_range(12, 0));
        assert!(!base.contains_range(13, 0));
        assert!(!base.contains_range(usize::MAX, 2));
    }

    #[test]
    fn work_charge_has_floor() {
        assert_eq!(NetBase::new(0).work_charge(), 1);
        assert_eq!(NetBase::new(5).work_charge(), 5);
    }

    #[test]
    fn leaf_defaults() {
        let mut net = Net::new(&NetConfig::default());
        let top = net.top();
        let leaf = net.insert_layer(top, Network::leaf(3)).unwrap();
        net.build(top, 0).unwrap();

        assert_eq!(net.fanin(leaf, 1, 99).unwrap(), 1);
        assert_eq!(net.fanout(leaf, 0, 3).unwrap(), 0);
        assert!(matches!(
            net.to_value(leaf, 0),
            Err(NetError::NotImplemented { class: "Network", .. })
        ));
        assert!(matches!(
            net.locate(leaf, 0),
            Err(NetError::NotImplemented { .. })
        ));
        assert!(matches!(
            net.build_locate(leaf, 0),
            Err(NetError::NotImplemented { .. })
        ));
    }

    #[test]
    fn describe_renders_range_and_class() {
        let mut net = Net::new(&NetConfig::default());
        let top = net.top();
        let leaf = net.insert_layer(top, Network::leaf(16)).unwrap();
        net.build(top, 0x10).unwrap();
        let line = net.describe(leaf);
        assert!(line.contains("[0x00000010::0x00000020].0x0010 Network"), "{line}");
        assert!(net.describe(NetId(99)).contains("unknown"));
    }
}
