mod device;
mod runtime;

pub use device::{LoopbackMicrophone, LoopbackSpeaker};
pub use runtime::LoopbackRuntime;
