//! Host-side VHWA command pipeline.
//!
//! Producers (the device emulation thread) hand guest and host commands to a [`VhwaPipe`], which
//! answers admin commands inline and queues everything else on a shared
//! [`CommandElementProcessor`]. The render thread owns a [`VhwaOverlay`] that drains the queue,
//! executes commands against its image, and reports results through a [`VhwaCompletion`].

#![forbid(unsafe_code)]

pub mod guest_cmd;
pub mod overlay;
pub mod pipe;
pub mod processor;

pub use overlay::{RepaintResult, VhwaOverlay, QUEUE_SAVED_VERSION};
pub use pipe::{Submitted, VhwaPipe, VramCompletion};
pub use processor::{
    CommandElement, CommandElementProcessor, CommandFunc, CommandNotify, ProcessorError,
    VhwaCompletion, VhwaSubmission,
};
