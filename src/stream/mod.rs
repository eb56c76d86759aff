//! Stream adapters for decoded PCM.

mod pace;
mod pcm;

pub use pace::{Pace, PaceExt};
pub use pcm::PcmStream;
