//! Video hardware acceleration (VHWA) pipeline.
//!
//! The guest submits VHWA commands through a [`VhwaPipe`]; a single render thread drains them
//! with a [`VhwaOverlay`], which owns the surface model ([`VhwaImage`]) and every GL resource.

#![forbid(unsafe_code)]

pub use vhwa_devices::{
    CommandElement, CommandElementProcessor, CommandNotify, ProcessorError, RepaintResult,
    Submitted, VhwaCompletion, VhwaOverlay, VhwaPipe, VhwaSubmission, VramCompletion,
};
pub use vhwa_overlay::{
    FramebufferInfo, GlBackend, GlCaps, RecordingGl, VhwaImage, VhwaInfo, VhwaSettings,
};
pub use vhwa_protocol::{VhwaCmdType, VhwaCommand, VhwaError, VhwaReply};

pub use vhwa_devices as devices;
pub use vhwa_overlay as overlay;
pub use vhwa_protocol as protocol;
pub use vhwa_snapshot as snapshot;
