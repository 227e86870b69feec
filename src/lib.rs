//! # pulsenet
//!
//! A clock-driven, token-addressed pulse-propagation engine.
//!
//! Networks form a tree over one flat token space. Every cycle the Root
//! fans out its whole range across worker threads; pulses accumulate into
//! double-buffered atomic cells and become readable after the cycle's swap.
//! Signal scaling is fixed-point throughout.
//!
//! ## Quick Start
//!
//! ```
//! use pulsenet::prelude::*;
//!
//! let mut root = Root::new(NetConfig::default().with_threads(2).with_seed(7)).unwrap();
//! let top = root.top();
//! let middle = root.insert_layer(top, Network::middle("m")).unwrap();
//! let fanout = root.insert_layer(middle, Network::fanout(8)).unwrap();
//! let out = root.insert_layer(middle, Network::out_buffer(8)).unwrap();
//!
//! root.build(0).unwrap();
//! root.settle().unwrap();
//!
//! root.net().fanin(fanout, 0, 100).unwrap();
//! root.update().unwrap(); // the pulse becomes readable
//! root.update().unwrap(); // and is pushed into the OutBuffer
//! assert_eq!(root.to_values(out).unwrap().len(), 8);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): config files and JSON observer snapshots
//! - `parallel`: dispatch worker partitions through rayon
//!
//! ## Modules
//!
//! - [`network`]: the arena, the `Neuron` trait, build/update dispatch
//! - [`layer`] / [`middle`]: containers and shared flyweight storage
//! - [`neuron`]: `FanoutNeuron`, `FaninpNeuron`, `OutBuffer`
//! - [`video`]: frame adapters
//! - [`root`]: clock and worker threads
//! - [`observer`]: read-only snapshots

#[path = "core/fixed.rs"]
pub mod fixed;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/buffer.rs"]
pub mod buffer;

#[path = "core/network.rs"]
pub mod network;

#[path = "core/layer.rs"]
pub mod layer;

#[path = "core/middle.rs"]
pub mod middle;

#[path = "core/neuron.rs"]
pub mod neuron;

#[path = "core/video.rs"]
pub mod video;

#[path = "core/root.rs"]
pub mod root;

pub mod observer;

#[path = "experiments/video_chain.rs"]
pub mod video_chain;

/// Prelude module for convenient imports.
///
/// ```
/// use pulsenet::prelude::*;
/// ```
pub mod prelude {
    pub use crate::buffer::ValueView;
    pub use crate::config::{ExecutionTier, NetConfig};
    pub use crate::error::{NetError, NetResult};
    pub use crate::fixed::{to_pulse, Count, Pulse, Rc, Token, Value, Weight, UNIT};
    pub use crate::middle::{FanoutBundle, DIM};
    pub use crate::network::{Net, NetBase, NetId, Network};
    pub use crate::observer::{NetAdapter, NetSnapshot};
    pub use crate::root::{CycleReport, Root};
    pub use crate::video::{FrameSource, NoiseSource, Pixel, VideoSource};
    pub use crate::video_chain::VideoChain;
}
