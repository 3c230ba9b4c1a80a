// 解码缓冲区交换协议

pub mod ownership;
pub mod passthrough;
pub mod registry;
pub mod service;
pub mod session;

pub use ownership::{OutputFrameOwnership, OwnershipError, SlotStatus};
pub use passthrough::{PassthroughDecoder, PassthroughFactory, PassthroughOptions, PassthroughProbe, ProbeCounters};
pub use registry::DecoderRegistry;
pub use service::{DecoderFactory, DecoderService, InputSlotStatus, OutputSlotStatus};
pub use session::{DecoderSession, InputBuffer, InputStatus, OutputFrame, OutputStatus};
