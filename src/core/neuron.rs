//! Flyweight neurons: views into their MiddleLayer's storage.
//!
//! A flyweight owns an index into the shared regions and nothing else.
//! Indices are fixed at insertion (region-relative) and at build (shifted
//! past the fanout prefix); the usable start is re-checked against the
//! allocated storage on every settle pass 0 and every `update()`.

use tracing::{debug, trace};

use crate::buffer::ValueView;
use crate::error::{NetError, NetResult};
use crate::fixed::{saturate, to_pulse, Count, Pulse, Rc, Token, Value, UNIT};
use crate::middle::{FanoutBundle, MiddleStorage};
use crate::network::{value_at, Cx, Net, NetId, NetKind, Neuron};
use crate::prng::{mix, Prng};

fn unregistered() -> NetError {
    NetError::ShouldNotOccur("flyweight is not registered with a MiddleLayer")
}

fn unresolved() -> NetError {
    NetError::ShouldNotOccur("flyweight storage accessed before it was resolved")
}

fn outside() -> NetError {
    NetError::ShouldNotOccur("flyweight index outside its MiddleLayer storage")
}

fn span(start: usize, length: Count, limit: Count) -> NetResult<usize> {
    match start.checked_add(length) {
        Some(end) if end <= limit => Ok(start),
        _ => Err(outside()),
    }
}

fn accumulate(storage: &MiddleStorage, index: usize, pulse: Pulse) -> NetResult<Rc> {
    storage.values().accumulate(index, pulse).ok_or_else(outside)?;
    Ok(1)
}

fn getter_view<'a>(storage: &'a MiddleStorage, start: usize, length: Count) -> NetResult<ValueView<'a>> {
    storage
        .values()
        .getter()
        .get(start..start + length)
        .map(ValueView::new)
        .ok_or_else(outside)
}

/// Scatter ("push") neuron.
///
/// Each token's stable value is scaled by its trigger weight and pushed
/// through its bundle into the network that starts at this one's `ending`.
#[derive(Debug, Clone, Default)]
pub struct FanoutNeuron {
    layer: Option<NetId>,
    index: Count,
    next: Option<NetId>,
    resolved: Option<usize>,
}

impl FanoutNeuron {
    pub(crate) fn register(&mut self, layer: NetId, index: Count) {
        self.layer = Some(layer);
        self.index = index;
    }

    pub fn index(&self) -> Count {
        self.index
    }

    pub fn next(&self) -> Option<NetId> {
        self.next
    }

    fn layer(&self) -> NetResult<NetId> {
        self.layer.ok_or_else(unregistered)
    }

    fn resolved(&self) -> NetResult<(NetId, usize)> {
        Ok((self.layer()?, self.resolved.ok_or_else(unresolved)?))
    }

    /// Push `trigger` over each live edge of `bundle`; returns the fanins acknowledged.
    pub fn fanout_bundle(
        &self,
        cx: Cx<'_>,
        next: NetId,
        bundle: &FanoutBundle,
        trigger: Value,
    ) -> NetResult<Rc> {
        let mut rc = 0;
        for (index, weight) in bundle.edges() {
            let pulse = to_pulse(trigger, weight);
            if pulse != 0 {
                rc += cx.net.fanin(next, cx.base.ending() + index as Token, pulse)?;
            }
        }
        Ok(rc)
    }
}

impl Neuron for FanoutNeuron {
    fn class_name(&self) -> &'static str {
        "FanoutNeuron"
    }

    fn fanin(&self, cx: Cx<'_>, token: Token, pulse: Pulse) -> NetResult<Rc> {
        let offset = cx.offset(token)?;
        let (layer, start) = self.resolved()?;
        accumulate(cx.net.storage(layer)?, start + offset, pulse)
    }

    fn fanout(&self, cx: Cx<'_>, token: Token, count: Count) -> NetResult<Rc> {
        if cx.verbose() {
            trace!(">> {}.fanout({:#x}, {:#x})", cx.net.describe(cx.id), token, count);
        }
        if !cx.base.contains_range(token, count) {
            return Err(NetError::Lookup { token });
        }
        let (layer, start) = self.resolved()?;
        let next = self
            .next
            .ok_or(NetError::ShouldNotOccur("FanoutNeuron has no next network"))?;
        let storage = cx.net.storage(layer)?;

        let first = start + (token - cx.base.origin());
        let mut rc = 0;
        for i in first..first + count {
            let value = storage.values().get(i).ok_or_else(outside)?;
            if value == 0 {
                continue;
            }
            let weight = *storage.weights().get(i).ok_or_else(outside)?;
            let trigger = saturate(to_pulse(value, weight));
            if trigger == 0 {
                continue;
            }
            let bundle = storage.bundles().get(i).ok_or_else(outside)?;
            rc += self.fanout_bundle(cx, next, bundle, trigger)?;
        }

        if cx.verbose() {
            trace!("<< {}.fanout: {} fanins", cx.net.describe(cx.id), rc);
        }
        Ok(rc)
    }

    fn to_value(&self, cx: Cx<'_>, token: Token) -> NetResult<Value> {
        value_at(self.to_values(cx)?, cx, token)
    }

    fn to_values<'a>(&'a self, cx: Cx<'a>) -> NetResult<ValueView<'a>> {
        let (layer, start) = self.resolved()?;
        getter_view(cx.net.storage(layer)?, start, cx.base.length())
    }
}

/// Gather ("pull") neuron.
///
/// Each token sums its bundle's weighted reads of the previous network
/// (the one ending at this one's origin) and fans the scaled sum in to the
/// next network. Incoming fanin is not counted.
#[derive(Debug, Clone, Default)]
pub struct FaninpNeuron {
    layer: Option<NetId>,
    bundle_index: Count,
    weight_index: Count,
    prev: Option<NetId>,
    next: Option<NetId>,
    resolved: Option<(usize, usize)>,
}

impl FaninpNeuron {
    pub(crate) fn register(&mut self, layer: NetId, bundle_index: Count, weight_index: Count) {
        self.layer = Some(layer);
        self.bundle_index = bundle_index;
        self.weight_index = weight_index;
    }

    pub fn bundle_index(&self) -> Count {
        self.bundle_index
    }

    pub fn weight_index(&self) -> Count {
        self.weight_index
    }

    pub fn prev(&self) -> Option<NetId> {
        self.prev
    }

    pub fn next(&self) -> Option<NetId> {
        self.next
    }

    fn layer(&self) -> NetResult<NetId> {
        self.layer.ok_or_else(unregistered)
    }

    fn resolved(&self) -> NetResult<(NetId, usize, usize)> {
        let (bundle, weight) = self.resolved.ok_or_else(unresolved)?;
        Ok((self.layer()?, bundle, weight))
    }

    /// Weighted sum of the previous network's values over `bundle`'s live edges.
    pub fn faninp_bundle(
        &self,
        net: &Net,
        prev: NetId,
        prev_origin: Token,
        bundle: &FanoutBundle,
    ) -> NetResult<Pulse> {
        let mut sum: Pulse = 0;
        for (index, weight) in bundle.edges() {
            if weight == 0 {
                continue;
            }
            let value = net.to_value(prev, prev_origin + index as Token)?;
            sum += to_pulse(value, weight);
        }
        Ok(sum)
    }
}

impl Neuron for FaninpNeuron {
    fn class_name(&self) -> &'static str {
        "FaninpNeuron"
    }

    fn fanin(&self, _cx: Cx<'_>, _token: Token, _pulse: Pulse) -> NetResult<Rc> {
        Ok(0)
    }

    fn fanout(&self, cx: Cx<'_>, token: Token, count: Count) -> NetResult<Rc> {
        if cx.verbose() {
            trace!(">> {}.fanout({:#x}, {:#x})", cx.net.describe(cx.id), token, count);
        }
        if !cx.base.contains_range(token, count) {
            return Err(NetError::Lookup { token });
        }
        let (layer, bundle_start, weight_start) = self.resolved()?;
        let (Some(prev), Some(next)) = (self.prev, self.next) else {
            return Err(NetError::ShouldNotOccur("FaninpNeuron neighbours not located"));
        };
        let prev_origin = cx.net.base(prev)?.origin();
        let next_base = *cx.net.base(next)?;
        if next_base.length() == 0 {
            return Ok(0);
        }
        let storage = cx.net.storage(layer)?;

        let first = token - cx.base.origin();
        let mut rc = 0;
        for off in first..first + count {
            let bundle = storage.bundles().get(bundle_start + off).ok_or_else(outside)?;
            let weight = *storage.weights().get(weight_start + off).ok_or_else(outside)?;
            let gathered = self.faninp_bundle(cx.net, prev, prev_origin, bundle)?;
            let pulse = to_pulse(saturate(gathered), weight);
            if pulse != 0 {
                rc += cx.net.fanin(next, next_base.origin() + off % next_base.length(), pulse)?;
            }
        }

        if cx.verbose() {
            trace!("<< {}.fanout: {} fanins", cx.net.describe(cx.id), rc);
        }
        Ok(rc)
    }
}

/// Output tap: accumulates fanin and exposes the stable half for reading.
#[derive(Debug, Clone, Default)]
pub struct OutBuffer {
    layer: Option<NetId>,
    index: Count,
    resolved: Option<usize>,
}

impl OutBuffer {
    pub(crate) fn register(&mut self, layer: NetId, index: Count) {
        self.layer = Some(layer);
        self.index = index;
    }

    pub fn index(&self) -> Count {
        self.index
    }

    fn layer(&self) -> NetResult<NetId> {
        self.layer.ok_or_else(unregistered)
    }

    fn resolved(&self) -> NetResult<(NetId, usize)> {
        Ok((self.layer()?, self.resolved.ok_or_else(unresolved)?))
    }
}

impl Neuron for OutBuffer {
    fn class_name(&self) -> &'static str {
        "OutBuffer"
    }

    fn fanin(&self, cx: Cx<'_>, token: Token, pulse: Pulse) -> NetResult<Rc> {
        let offset = cx.offset(token)?;
        let (layer, start) = self.resolved()?;
        accumulate(cx.net.storage(layer)?, start + offset, pulse)
    }

    fn to_value(&self, cx: Cx<'_>, token: Token) -> NetResult<Value> {
        value_at(self.to_values(cx)?, cx, token)
    }

    fn to_values<'a>(&'a self, cx: Cx<'a>) -> NetResult<ValueView<'a>> {
        let (layer, start) = self.resolved()?;
        getter_view(cx.net.storage(layer)?, start, cx.base.length())
    }
}

impl Net {
    pub(crate) fn build_fanout(&mut self, id: NetId) -> NetResult<()> {
        let node = self.node(id)?;
        let NetKind::Fanout(n) = &node.kind else {
            return Err(NetError::ShouldNotOccur("expected a FanoutNeuron"));
        };
        let next = self.build_locate(n.layer()?, node.base.ending())?;
        if let NetKind::Fanout(n) = &mut self.node_mut(id)?.kind {
            n.next = Some(next);
        }
        Ok(())
    }

    pub(crate) fn build_faninp(&mut self, id: NetId) -> NetResult<()> {
        let node = self.node(id)?;
        let NetKind::Faninp(n) = &node.kind else {
            return Err(NetError::ShouldNotOccur("expected a FaninpNeuron"));
        };
        let layer = n.layer()?;
        let base = node.base;
        let shift = self.middle(layer)?.fanout_length();
        let Some(last) = base.origin().checked_sub(1) else {
            return Err(NetError::construction(
                "FaninpNeuron at token 0 has no previous network",
            ));
        };
        let prev = self.build_locate(layer, last)?;
        let next = self.build_locate(layer, base.ending())?;
        if let NetKind::Faninp(n) = &mut self.node_mut(id)?.kind {
            n.bundle_index += shift;
            n.weight_index += shift;
            n.prev = Some(prev);
            n.next = Some(next);
        }
        Ok(())
    }

    pub(crate) fn build_out_buffer(&mut self, id: NetId) -> NetResult<()> {
        let NetKind::OutBuffer(n) = &self.node(id)?.kind else {
            return Err(NetError::ShouldNotOccur("expected an OutBuffer"));
        };
        let shift = self.middle(n.layer()?)?.fanout_length();
        if let NetKind::OutBuffer(n) = &mut self.node_mut(id)?.kind {
            n.index += shift;
        }
        Ok(())
    }

    /// Check a flyweight's indices against its MiddleLayer's allocated storage.
    pub(crate) fn resolve_flyweight(&mut self, id: NetId) -> NetResult<()> {
        let node = self.node(id)?;
        if !node.base.is_built() {
            return Err(NetError::ShouldNotOccur("flyweight resolved before build"));
        }
        let length = node.base.length();
        match &node.kind {
            NetKind::Fanout(n) => {
                let layout = self.storage(n.layer()?)?.layout();
                let start = span(n.index, length, layout.fanout)?;
                if let NetKind::Fanout(n) = &mut self.node_mut(id)?.kind {
                    n.resolved = Some(start);
                }
            }
            NetKind::Faninp(n) => {
                let layout = self.storage(n.layer()?)?.layout();
                let bundle = span(n.bundle_index, length, layout.bundle)?;
                let weight = span(n.weight_index, length, layout.weight)?;
                if let NetKind::Faninp(n) = &mut self.node_mut(id)?.kind {
                    n.resolved = Some((bundle, weight));
                }
            }
            NetKind::OutBuffer(n) => {
                let layout = self.storage(n.layer()?)?.layout();
                let start = span(n.index, length, layout.getset)?;
                if let NetKind::OutBuffer(n) = &mut self.node_mut(id)?.kind {
                    n.resolved = Some(start);
                }
            }
            _ => return Err(NetError::ShouldNotOccur("expected a flyweight")),
        }
        Ok(())
    }

    /// The FaninpNeuron's previous network must expose per-token values.
    pub(crate) fn check_faninp_source(&self, id: NetId) -> NetResult<()> {
        let NetKind::Faninp(n) = &self.node(id)?.kind else {
            return Ok(());
        };
        let Some(prev) = n.prev else {
            return Err(NetError::ShouldNotOccur("FaninpNeuron has no previous network"));
        };
        let base = self.base(prev)?;
        if base.length() > 0 {
            self.to_value(prev, base.origin())?;
        }
        Ok(())
    }

    /// Draw initial bundles and set trigger weights to [`UNIT`].
    ///
    /// FanoutNeuron bundles index the next network, FaninpNeuron bundles the
    /// previous one. The draw is seeded per node so it does not depend on
    /// build order.
    pub(crate) fn wire_bundles(&mut self, id: NetId) -> NetResult<()> {
        let node = self.node(id)?;
        let length = node.base.length();
        let (layer, bundle_start, weight_start, target) = match &node.kind {
            NetKind::Fanout(n) => {
                let (layer, start) = n.resolved()?;
                let next = n
                    .next
                    .ok_or(NetError::ShouldNotOccur("FanoutNeuron has no next network"))?;
                (layer, start, start, next)
            }
            NetKind::Faninp(n) => {
                let (layer, bundle, weight) = n.resolved()?;
                let prev = n
                    .prev
                    .ok_or(NetError::ShouldNotOccur("FaninpNeuron has no previous network"))?;
                (layer, bundle, weight, prev)
            }
            _ => return Ok(()),
        };
        let targets = self.base(target)?.length();
        if targets == 0 {
            return Err(NetError::construction(format!(
                "{} has no tokens to connect to",
                self.describe(id)
            )));
        }

        let wiring = self.wiring;
        let mut rng = Prng::new(mix(self.seed(), id.index() as u64));
        let storage = self.storage_mut(layer)?;
        for off in 0..length {
            let bundle = FanoutBundle::random(
                &mut rng,
                wiring.live_edges,
                wiring.weight_min,
                wiring.weight_max,
                targets,
            );
            *storage
                .bundles_mut()
                .get_mut(bundle_start + off)
                .ok_or_else(outside)? = bundle;
            *storage
                .weights_mut()
                .get_mut(weight_start + off)
                .ok_or_else(outside)? = UNIT;
        }
        debug!(
            "{} wired {} bundles into {} tokens",
            self.describe(id),
            length,
            targets
        );
        Ok(())
    }
}
