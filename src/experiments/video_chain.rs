//! Reference wiring: a video frame pulled through a chain of flyweights.
//!
//! ```text
//! Root
//! └── MiddleLayer "video-chain"
//!     ├── VideoInp 32x32      (1024 tokens)
//!     ├── FaninpNeuron(16)    gathers from the frame
//!     ├── FanoutNeuron(16) x4 each pushes into the next
//!     └── OutBuffer(64)       read out every cycle
//! ```

use crate::config::NetConfig;
use crate::error::NetResult;
use crate::fixed::Count;
use crate::network::{NetId, Network};
use crate::root::Root;
use crate::video::VideoSource;

pub const WIDTH: Count = 32;
pub const HEIGHT: Count = 32;
pub const NEURONS: Count = 16;
pub const STAGES: usize = 4;
pub const OUTPUTS: Count = 64;

/// Ids of the nodes of one video chain.
#[derive(Debug, Clone)]
pub struct VideoChain {
    pub middle: NetId,
    pub video: NetId,
    pub faninp: NetId,
    pub fanouts: Vec<NetId>,
    pub output: NetId,
}

impl VideoChain {
    /// Insert the chain under the Root's top layer. The Root is not built.
    pub fn insert(root: &mut Root, source: impl VideoSource + 'static) -> NetResult<Self> {
        let top = root.top();
        let middle = root.insert_layer(top, Network::middle("video-chain"))?;
        let video = root.insert_layer(middle, Network::video_inp(WIDTH, HEIGHT, source)?)?;
        let faninp = root.insert_layer(middle, Network::faninp(NEURONS))?;
        let fanouts = (0..STAGES)
            .map(|_| root.insert_layer(middle, Network::fanout(NEURONS)))
            .collect::<NetResult<Vec<_>>>()?;
        let output = root.insert_layer(middle, Network::out_buffer(OUTPUTS))?;
        Ok(Self {
            middle,
            video,
            faninp,
            fanouts,
            output,
        })
    }

    /// A built and settled Root holding one chain.
    pub fn build(cfg: NetConfig, source: impl VideoSource + 'static) -> NetResult<(Root, Self)> {
        let mut root = Root::new(cfg)?;
        let chain = Self::insert(&mut root, source)?;
        root.build(0)?;
        root.settle()?;
        Ok((root, chain))
    }

    pub fn token_count() -> Count {
        WIDTH * HEIGHT + NEURONS * (1 + STAGES) + OUTPUTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::NoiseSource;

    #[test]
    fn chain_is_contiguous() {
        let (root, chain) = VideoChain::build(NetConfig::default(), NoiseSource::new(1)).unwrap();
        let net = root.net();
        assert_eq!(net.base(root.top()).unwrap().length(), VideoChain::token_count());
        assert_eq!(net.base(chain.faninp).unwrap().origin(), WIDTH * HEIGHT);
        assert_eq!(
            net.base(chain.output).unwrap().ending(),
            VideoChain::token_count()
        );
        assert_eq!(net.layer(chain.middle).unwrap().input(), Some(chain.video));
        assert_eq!(net.layer(chain.middle).unwrap().output(), Some(chain.output));
    }
}
