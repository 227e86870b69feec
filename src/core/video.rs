//! Frame adapters at the edge of the network.
//!
//! [`VideoInp`] turns frames pulled from a [`VideoSource`] into token values;
//! [`VideoOut`] accumulates fanin into a frame that can be rendered back to
//! pixels.

use std::fmt;

use tracing::{debug, trace};

use crate::buffer::{DoubleBuffer, ValueView};
use crate::error::{NetError, NetResult};
use crate::fixed::{Count, Pulse, Rc, Token, Value};
use crate::network::{value_at, Cx, Net, NetId, NetKind, Neuron};
use crate::prng::{mix, Prng};

/// One pixel: grey (`w`) plus colour channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pixel {
    pub w: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Pixel {
    pub fn grey(v: u8) -> Self {
        Self { w: v, r: v, g: v, b: v }
    }

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        let w = ((r as u16 + g as u16 + b as u16) / 3) as u8;
        Self { w, r, g, b }
    }
}

/// Supplier of frames.
pub trait VideoSource: Send + Sync {
    /// Fill `pixels` (row-major, `width * height`) with the next frame and
    /// return its classification label when the source knows one.
    fn fetch(&mut self, pixels: &mut [Pixel], width: Count, height: Count) -> Option<u8>;
}

/// Pseudo-random frames with no label.
#[derive(Debug, Clone)]
pub struct NoiseSource {
    rng: Prng,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Prng::new(seed),
        }
    }
}

impl VideoSource for NoiseSource {
    fn fetch(&mut self, pixels: &mut [Pixel], width: Count, height: Count) -> Option<u8> {
        for p in pixels.iter_mut().take(width * height) {
            *p = Pixel::rgb(self.rng.next_u8(), self.rng.next_u8(), self.rng.next_u8());
        }
        None
    }
}

/// Replays caller-supplied frames in order, wrapping around.
#[derive(Debug, Clone, Default)]
pub struct FrameSource {
    frames: Vec<(Vec<Pixel>, Option<u8>)>,
    next: usize,
}

impl FrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single frame of `pixel` repeated `area` times.
    pub fn constant(pixel: Pixel, area: Count, label: Option<u8>) -> Self {
        Self::new().with_frame(vec![pixel; area], label)
    }

    pub fn with_frame(mut self, frame: Vec<Pixel>, label: Option<u8>) -> Self {
        self.frames.push((frame, label));
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl VideoSource for FrameSource {
    fn fetch(&mut self, pixels: &mut [Pixel], width: Count, height: Count) -> Option<u8> {
        let area = (width * height).min(pixels.len());
        let Some((frame, label)) = self.frames.get(self.next) else {
            pixels[..area].fill(Pixel::default());
            return None;
        };
        for (i, p) in pixels[..area].iter_mut().enumerate() {
            *p = frame.get(i).copied().unwrap_or_default();
        }
        let label = *label;
        self.next = (self.next + 1) % self.frames.len();
        label
    }
}

/// Frame input: one token per pixel, valued by the pixel's grey channel.
///
/// Holds the current and prior frame. Its fanout pushes each non-black
/// pixel to a token of the network at its `ending`, chosen from seed, clock
/// and pixel so concurrent workers need no shared generator.
pub struct VideoInp {
    width: Count,
    height: Count,
    current: Vec<Pixel>,
    prior: Vec<Pixel>,
    source: Box<dyn VideoSource>,
    label: Option<u8>,
    frames: u64,
    next: Option<NetId>,
}

impl fmt::Debug for VideoInp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoInp")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("label", &self.label)
            .field("frames", &self.frames)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

impl VideoInp {
    pub(crate) fn new(
        width: Count,
        height: Count,
        source: Box<dyn VideoSource>,
    ) -> NetResult<Self> {
        let area = width
            .checked_mul(height)
            .ok_or_else(|| NetError::construction("VideoInp frame size overflows"))?;
        Ok(Self {
            width,
            height,
            current: vec![Pixel::default(); area],
            prior: vec![Pixel::default(); area],
            source,
            label: None,
            frames: 0,
            next: None,
        })
    }

    pub fn width(&self) -> Count {
        self.width
    }

    pub fn height(&self) -> Count {
        self.height
    }

    pub fn area(&self) -> Count {
        self.current.len()
    }

    pub fn current(&self) -> &[Pixel] {
        &self.current
    }

    pub fn prior(&self) -> &[Pixel] {
        &self.prior
    }

    /// Label reported by the source for the current frame.
    pub fn label(&self) -> Option<u8> {
        self.label
    }

    pub fn frames_fetched(&self) -> u64 {
        self.frames
    }

    pub fn next(&self) -> Option<NetId> {
        self.next
    }

    fn advance(&mut self) {
        std::mem::swap(&mut self.current, &mut self.prior);
        self.label = self
            .source
            .fetch(&mut self.current, self.width, self.height);
        self.frames += 1;
    }
}

impl Neuron for VideoInp {
    fn class_name(&self) -> &'static str {
        "VideoInp"
    }

    fn fanout(&self, cx: Cx<'_>, token: Token, count: Count) -> NetResult<Rc> {
        if !cx.base.contains_range(token, count) {
            return Err(NetError::Lookup { token });
        }
        let Some(next) = self.next else {
            return Ok(0);
        };
        let next_base = *cx.net.base(next)?;
        if next_base.length() == 0 {
            return Ok(0);
        }
        let salt = mix(cx.net.seed(), cx.net.clock());

        let first = token - cx.base.origin();
        let mut rc = 0;
        for (off, pixel) in self.current.iter().enumerate().skip(first).take(count) {
            let pulse = pixel.w as Pulse;
            if pulse == 0 {
                continue;
            }
            let pick = (mix(salt, off as u64) % next_base.length() as u64) as Count;
            rc += cx.net.fanin(next, next_base.origin() + pick, pulse)?;
        }
        if cx.verbose() {
            trace!("{}.fanout: {} fanins", cx.net.describe(cx.id), rc);
        }
        Ok(rc)
    }

    fn to_value(&self, cx: Cx<'_>, token: Token) -> NetResult<Value> {
        let offset = cx.offset(token)?;
        self.current
            .get(offset)
            .map(|p| p.w as Value)
            .ok_or(NetError::ShouldNotOccur("VideoInp frame shorter than its range"))
    }
}

/// Frame output: accumulates fanin per pixel into its own double buffer.
#[derive(Debug)]
pub struct VideoOut {
    width: Count,
    height: Count,
    values: DoubleBuffer,
}

impl VideoOut {
    pub(crate) fn new(width: Count, height: Count) -> NetResult<Self> {
        let area = width
            .checked_mul(height)
            .ok_or_else(|| NetError::construction("VideoOut frame size overflows"))?;
        Ok(Self {
            width,
            height,
            values: DoubleBuffer::new(area)?,
        })
    }

    pub fn width(&self) -> Count {
        self.width
    }

    pub fn height(&self) -> Count {
        self.height
    }

    pub fn area(&self) -> Count {
        self.values.len()
    }

    /// The stable half rendered as grey pixels, clamped to `0..=255`.
    pub fn to_pixels(&self) -> Vec<Pixel> {
        ValueView::new(self.values.getter())
            .iter()
            .map(|v| Pixel::grey(v.clamp(0, 255) as u8))
            .collect()
    }

    pub(crate) fn swap(&mut self) {
        self.values.swap();
    }
}

impl Neuron for VideoOut {
    fn class_name(&self) -> &'static str {
        "VideoOut"
    }

    fn fanin(&self, cx: Cx<'_>, token: Token, pulse: Pulse) -> NetResult<Rc> {
        let offset = cx.offset(token)?;
        self.values
            .accumulate(offset, pulse)
            .ok_or(NetError::ShouldNotOccur("VideoOut buffer shorter than its range"))?;
        Ok(1)
    }

    fn to_value(&self, cx: Cx<'_>, token: Token) -> NetResult<Value> {
        value_at(self.to_values(cx)?, cx, token)
    }

    fn to_values<'a>(&'a self, _cx: Cx<'a>) -> NetResult<ValueView<'a>> {
        Ok(ValueView::new(self.values.getter()))
    }
}

impl Net {
    /// Locate the network that receives this input's pushes. A VideoInp at
    /// the end of the tree has none.
    pub(crate) fn build_video_inp(&mut self, id: NetId) -> NetResult<()> {
        let node = self.node(id)?;
        let owner = node
            .owner()
            .ok_or(NetError::ShouldNotOccur("VideoInp has no owner"))?;
        let next = match self.build_locate(owner, node.base().ending()) {
            Ok(next) => Some(next),
            Err(NetError::Lookup { .. }) => None,
            Err(e) => return Err(e),
        };
        if let NetKind::VideoInp(v) = &mut self.node_mut(id)?.kind {
            v.next = next;
        }
        Ok(())
    }

    /// Swap frames and fetch the next one into `current`.
    pub(crate) fn advance_video_inp(&mut self, id: NetId) -> NetResult<()> {
        if let NetKind::VideoInp(v) = &mut self.node_mut(id)?.kind {
            v.advance();
            debug!("VideoInp {} frame {} label {:?}", id, v.frames, v.label);
        }
        Ok(())
    }

    pub fn video_out(&self, id: NetId) -> NetResult<&VideoOut> {
        let node = self.node(id)?;
        match node.kind() {
            NetKind::VideoOut(v) => Ok(v),
            _ => Err(NetError::not_implemented(node.class_name(), "to_pixels")),
        }
    }

    pub fn video_inp(&self, id: NetId) -> NetResult<&VideoInp> {
        let node = self.node(id)?;
        match node.kind() {
            NetKind::VideoInp(v) => Ok(v),
            _ => Err(NetError::not_implemented(node.class_name(), "frame")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;
    use crate::network::Network;

    #[test]
    fn frame_source_replays_and_wraps() {
        let mut src = FrameSource::new()
            .with_frame(vec![Pixel::grey(1); 4], Some(3))
            .with_frame(vec![Pixel::grey(2); 2], None);
        let mut px = vec![Pixel::default(); 4];
        assert_eq!(src.fetch(&mut px, 2, 2), Some(3));
        assert!(px.iter().all(|p| p.w == 1));
        assert_eq!(src.fetch(&mut px, 2, 2), None);
        assert_eq!(px[1].w, 2);
        assert_eq!(px[3].w, 0);
        assert_eq!(src.fetch(&mut px, 2, 2), Some(3));
    }

    #[test]
    fn empty_frame_source_is_black() {
        let mut src = FrameSource::new();
        let mut px = vec![Pixel::grey(9); 4];
        assert_eq!(src.fetch(&mut px, 2, 2), None);
        assert!(px.iter().all(|p| *p == Pixel::default()));
    }

    #[test]
    fn noise_source_is_seeded() {
        let mut a = NoiseSource::new(5);
        let mut b = NoiseSource::new(5);
        let mut pa = vec![Pixel::default(); 16];
        let mut pb = vec![Pixel::default(); 16];
        a.fetch(&mut pa, 4, 4);
        b.fetch(&mut pb, 4, 4);
        assert_eq!(pa, pb);
    }

    fn video_pair() -> (Net, NetId, NetId) {
        let mut net = Net::new(&NetConfig::default().with_seed(4));
        let top = net.top();
        let src = FrameSource::constant(Pixel::grey(7), 16, Some(1))
            .with_frame(vec![Pixel::grey(9); 16], Some(2));
        let inp = net
            .insert_layer(top, Network::video_inp(4, 4, src).unwrap())
            .unwrap();
        let out = net
            .insert_layer(top, Network::video_out(2, 2).unwrap())
            .unwrap();
        net.build(top, 0).unwrap();
        assert!(!net.build_update(top, 0).unwrap());
        (net, inp, out)
    }

    #[test]
    fn video_inp_exposes_grey_values_and_labels() {
        let (mut net, inp, out) = video_pair();
        assert_eq!(net.video_inp(inp).unwrap().next(), Some(out));
        assert_eq!(net.to_value(inp, 5).unwrap(), 7);
        assert_eq!(net.video_inp(inp).unwrap().label(), Some(1));

        let top = net.top();
        net.update(top).unwrap();
        let video = net.video_inp(inp).unwrap();
        assert_eq!(video.label(), Some(2));
        assert_eq!(video.prior()[0].w, 7);
        assert_eq!(net.to_value(inp, 5).unwrap(), 9);
        assert!(net.to_value(inp, 16).is_err());
    }

    #[test]
    fn video_pushes_reach_video_out() {
        let (mut net, inp, out) = video_pair();
        let top = net.top();
        assert_eq!(net.fanout(inp, 0, 16).unwrap(), 16);
        net.update(top).unwrap();
        let total: i32 = net.to_values(out).unwrap().iter().map(i32::from).sum();
        assert_eq!(total, 16 * 7);
        assert_eq!(net.video_out(out).unwrap().to_pixels().len(), 4);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let err = Network::video_inp(usize::MAX, 2, NoiseSource::new(1)).unwrap_err();
        assert!(matches!(err, NetError::Construction(_)), "{err}");
        let err = Network::video_out(2, usize::MAX).unwrap_err();
        assert!(matches!(err, NetError::Construction(_)), "{err}");
        assert_eq!(
            Network::video_inp(3, 5, NoiseSource::new(1)).unwrap().base().length(),
            15
        );
    }

    #[test]
    fn video_out_renders_clamped_grey() {
        let mut net = Net::new(&NetConfig::default());
        let top = net.top();
        let out = net
            .insert_layer(top, Network::video_out(3, 1).unwrap())
            .unwrap();
        net.build(top, 0).unwrap();
        net.fanin(out, 0, -20).unwrap();
        net.fanin(out, 1, 90).unwrap();
        net.fanin(out, 2, 900).unwrap();
        net.update(top).unwrap();
        let px: Vec<u8> = net.video_out(out).unwrap().to_pixels().iter().map(|p| p.w).collect();
        assert_eq!(px, vec![0, 90, 255]);
    }
}
