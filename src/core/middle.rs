//! MiddleLayer: a Layer that owns one storage blob shared by its flyweights.
//!
//! Every region begins with a fanout prefix (one entry per FanoutNeuron
//! token). The value buffers then append the OutBuffer entries, while the
//! bundle and weight arrays append the FaninpNeuron entries:
//!
//! ```text
//! values (getter, setter): [ fanout | getset ]
//! bundle:                  [ fanout | bundle ]
//! weight:                  [ fanout | weight ]
//! ```

use std::mem::size_of;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::buffer::DoubleBuffer;
use crate::error::{NetError, NetResult};
use crate::fixed::{Count, Pulse, Rc, Token, Weight};
use crate::layer::Layer;
use crate::network::{Cx, Net, NetId, Neuron};
use crate::prng::Prng;

/// Edges per bundle.
pub const DIM: usize = 8;

/// Bundle-relative target index.
pub type BundleIndex = u32;

/// Sparse connectivity for one token: up to [`DIM`] (index, weight) edges.
/// A zero weight marks an unused slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutBundle {
    pub index: [BundleIndex; DIM],
    pub weight: [Weight; DIM],
}

impl FanoutBundle {
    #[inline]
    pub fn edges(&self) -> impl Iterator<Item = (BundleIndex, Weight)> + '_ {
        self.index.iter().copied().zip(self.weight.iter().copied())
    }

    pub fn live_edges(&self) -> usize {
        self.weight.iter().filter(|&&w| w != 0).count()
    }

    pub fn set_edge(&mut self, slot: usize, index: BundleIndex, weight: Weight) -> Option<()> {
        *self.index.get_mut(slot)? = index;
        *self.weight.get_mut(slot)? = weight;
        Some(())
    }

    /// Random bundle with `live` edges into `[0, targets)`.
    pub(crate) fn random(
        rng: &mut Prng,
        live: usize,
        min: Weight,
        max: Weight,
        targets: Count,
    ) -> Self {
        let mut bundle = Self::default();
        let top = targets.min(BundleIndex::MAX as usize + 1);
        for slot in 0..live.min(DIM) {
            let index = rng.gen_range_usize(0, top) as BundleIndex;
            let weight = match rng.gen_range_i32(min as i32, max as i32) as Weight {
                0 => 1,
                w => w,
            };
            bundle.index[slot] = index;
            bundle.weight[slot] = weight;
        }
        bundle
    }
}

/// Element counts of each storage region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct MiddleLayout {
    pub fanout: Count,
    pub getset: Count,
    pub bundle: Count,
    pub weight: Count,
}

impl MiddleLayout {
    /// Bytes per FanoutNeuron token: getter, setter, weight and bundle.
    pub const PER_FANOUT_TOKEN: usize =
        2 * size_of::<i16>() + size_of::<Weight>() + size_of::<FanoutBundle>();
    /// Bytes per FaninpNeuron token: weight and bundle.
    pub const PER_FANINP_TOKEN: usize = size_of::<Weight>() + size_of::<FanoutBundle>();

    pub fn byte_size(&self) -> usize {
        2 * self.getset * size_of::<i16>()
            + self.weight * size_of::<Weight>()
            + self.bundle * size_of::<FanoutBundle>()
    }
}

/// The single allocation behind a MiddleLayer's flyweights.
#[derive(Debug)]
pub struct MiddleStorage {
    layout: MiddleLayout,
    values: DoubleBuffer,
    weight: Box<[Weight]>,
    bundle: Box<[FanoutBundle]>,
}

fn zeroed<T: Clone + Default>(len: usize) -> NetResult<Box<[T]>> {
    let mut v: Vec<T> = Vec::new();
    v.try_reserve_exact(len).map_err(|_| NetError::StorageExhausted {
        bytes: len.saturating_mul(size_of::<T>()),
    })?;
    v.resize(len, T::default());
    Ok(v.into_boxed_slice())
}

impl MiddleStorage {
    pub(crate) fn allocate(layout: MiddleLayout) -> NetResult<Self> {
        Ok(Self {
            layout,
            values: DoubleBuffer::new(layout.getset)?,
            weight: zeroed(layout.weight)?,
            bundle: zeroed(layout.bundle)?,
        })
    }

    pub fn layout(&self) -> MiddleLayout {
        self.layout
    }

    pub fn values(&self) -> &DoubleBuffer {
        &self.values
    }

    pub fn weights(&self) -> &[Weight] {
        &self.weight
    }

    pub fn bundles(&self) -> &[FanoutBundle] {
        &self.bundle
    }

    pub fn weights_mut(&mut self) -> &mut [Weight] {
        &mut self.weight
    }

    pub fn bundles_mut(&mut self) -> &mut [FanoutBundle] {
        &mut self.bundle
    }

    pub fn byte_size(&self) -> usize {
        self.values.byte_size()
            + self.weight.len() * size_of::<Weight>()
            + self.bundle.len() * size_of::<FanoutBundle>()
    }

    fn swap(&mut self) {
        self.values.swap();
    }
}

/// A Layer whose flyweight children share one [`MiddleStorage`].
#[derive(Debug)]
pub struct MiddleLayer {
    pub(crate) layer: Layer,
    name: String,
    fanout_length: Count,
    bundle_length: Count,
    getset_length: Count,
    weight_length: Count,
    storage: Option<MiddleStorage>,
}

impl MiddleLayer {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            layer: Layer::default(),
            name: name.into(),
            fanout_length: 0,
            bundle_length: 0,
            getset_length: 0,
            weight_length: 0,
            storage: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    pub fn fanout_length(&self) -> Count {
        self.fanout_length
    }

    pub fn bundle_length(&self) -> Count {
        self.bundle_length
    }

    pub fn getset_length(&self) -> Count {
        self.getset_length
    }

    pub fn weight_length(&self) -> Count {
        self.weight_length
    }

    pub fn layout(&self) -> MiddleLayout {
        MiddleLayout {
            fanout: self.fanout_length,
            getset: self.fanout_length + self.getset_length,
            bundle: self.fanout_length + self.bundle_length,
            weight: self.fanout_length + self.weight_length,
        }
    }

    pub fn storage(&self) -> Option<&MiddleStorage> {
        self.storage.as_ref()
    }

    pub(crate) fn register_fanout(&mut self, length: Count) -> Count {
        let index = self.fanout_length;
        self.fanout_length += length;
        index
    }

    /// Returns the (bundle, weight) indices, relative to the FaninpNeuron regions.
    pub(crate) fn register_faninp(&mut self, length: Count) -> (Count, Count) {
        let indices = (self.bundle_length, self.weight_length);
        self.bundle_length += length;
        self.weight_length += length;
        indices
    }

    /// Returns the index relative to the OutBuffer region.
    pub(crate) fn register_out_buffer(&mut self, length: Count) -> Count {
        let index = self.getset_length;
        self.getset_length += length;
        index
    }

    pub(crate) fn allocate(&mut self) -> NetResult<&MiddleStorage> {
        if self.storage.is_some() {
            return Err(NetError::ShouldNotOccur("MiddleLayer storage allocated twice"));
        }
        let layout = self.layout();
        Ok(&*self.storage.insert(MiddleStorage::allocate(layout)?))
    }

    pub(crate) fn swap(&mut self) -> NetResult<()> {
        self.storage
            .as_mut()
            .ok_or(NetError::ShouldNotOccur("MiddleLayer updated before build"))?
            .swap();
        Ok(())
    }
}

impl Neuron for MiddleLayer {
    fn class_name(&self) -> &'static str {
        "MiddleLayer"
    }

    fn fanin(&self, cx: Cx<'_>, token: Token, pulse: Pulse) -> NetResult<Rc> {
        self.layer.route_fanin(cx, token, pulse)
    }

    fn fanout(&self, cx: Cx<'_>, token: Token, count: Count) -> NetResult<Rc> {
        self.layer.route_fanout(cx, token, count)
    }
}

impl Net {
    pub fn middle(&self, id: NetId) -> NetResult<&MiddleLayer> {
        let node = self.node(id)?;
        node.kind
            .middle()
            .ok_or(NetError::not_implemented(node.class_name(), "middle"))
    }

    pub fn storage(&self, id: NetId) -> NetResult<&MiddleStorage> {
        self.middle(id)?
            .storage()
            .ok_or(NetError::ShouldNotOccur("MiddleLayer storage not allocated"))
    }

    pub(crate) fn storage_mut(&mut self, id: NetId) -> NetResult<&mut MiddleStorage> {
        let node = self.node_mut(id)?;
        let class = node.class_name();
        node.kind
            .middle_mut()
            .ok_or(NetError::not_implemented(class, "middle"))?
            .storage
            .as_mut()
            .ok_or(NetError::ShouldNotOccur("MiddleLayer storage not allocated"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::UNIT;

    #[test]
    fn registration_accumulates_counters() {
        let mut m = MiddleLayer::new("m");
        assert_eq!(m.register_fanout(16), 0);
        assert_eq!(m.register_fanout(8), 16);
        assert_eq!(m.register_faninp(16), (0, 0));
        assert_eq!(m.register_faninp(8), (16, 16));
        assert_eq!(m.register_out_buffer(64), 0);
        assert_eq!(m.register_out_buffer(4), 64);

        let layout = m.layout();
        assert_eq!(layout.fanout, 24);
        assert_eq!(layout.getset, 24 + 68);
        assert_eq!(layout.bundle, 24 + 24);
        assert_eq!(layout.weight, 24 + 24);
    }

    #[test]
    fn allocate_once_and_sized_from_layout() {
        let mut m = MiddleLayer::new("m");
        m.register_fanout(8);
        m.register_out_buffer(4);
        let layout = m.layout();
        let storage = m.allocate().unwrap();
        assert_eq!(storage.values().len(), 12);
        assert_eq!(storage.bundles().len(), 8);
        assert_eq!(storage.weights().len(), 8);
        assert_eq!(storage.byte_size(), layout.byte_size());
        assert!(storage.weights().iter().all(|&w| w == 0));
        assert!(m.allocate().is_err());
    }

    #[test]
    fn swap_requires_storage() {
        let mut m = MiddleLayer::new("m");
        assert!(m.swap().is_err());
        m.allocate().unwrap();
        assert!(m.swap().is_ok());
    }

    #[test]
    fn random_bundles_stay_in_range() {
        let mut rng = Prng::new(3);
        for _ in 0..200 {
            let b = FanoutBundle::random(&mut rng, 5, -(UNIT / 8), UNIT / 4, 16);
            assert_eq!(b.live_edges(), 5);
            for (slot, (index, weight)) in b.edges().enumerate() {
                if slot < 5 {
                    assert!(index < 16);
                    assert!((-(UNIT / 8)..=UNIT / 4).contains(&weight));
                } else {
                    assert_eq!((index, weight), (0, 0));
                }
            }
        }
    }

    #[test]
    fn set_edge_bounds() {
        let mut b = FanoutBundle::default();
        assert!(b.set_edge(7, 3, 9).is_some());
        assert!(b.set_edge(DIM, 3, 9).is_none());
        assert_eq!(b.live_edges(), 1);
    }

    #[test]
    fn per_token_costs() {
        // 8 x u32 index + 8 x i16 weight.
        assert_eq!(size_of::<FanoutBundle>(), 48);
        assert_eq!(MiddleLayout::PER_FANOUT_TOKEN, 54);
        assert_eq!(MiddleLayout::PER_FANINP_TOKEN, 50);
    }
}
