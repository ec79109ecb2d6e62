//! Producer side of the VHWA pipeline.
//!
//! The device model hands every VHWA command to [`VhwaPipe::submit`] (or
//! [`VhwaPipe::submit_guest`] for commands still sitting in VRAM). Host-only admin commands run
//! right here on the calling thread; everything else is queued for the render thread and
//! completed later through [`VhwaCompletion`].

use std::sync::Arc;

use vhwa_overlay::{Rect, SharedVram};
use vhwa_protocol::{VhwaCommand, VhwaError, VhwaReply, VhwaResult};

use crate::guest_cmd::{read_guest_command, write_guest_result};
use crate::processor::{
    CommandElementProcessor, ProcessorError, VhwaCompletion, VhwaSubmission,
};

/// How a submitted command was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    /// Finished on the calling thread with this result.
    Sync(VhwaResult<VhwaReply>),
    /// Queued; the result arrives through [`VhwaCompletion`].
    Async,
}

impl Submitted {
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async)
    }
}

/// Completion that patches results back into the guest's command in VRAM.
///
/// Host-built commands have nowhere to report to and are only logged. Raising the guest
/// interrupt afterwards is left to the device model wrapping this.
pub struct VramCompletion {
    vram: SharedVram,
}

impl VramCompletion {
    pub fn new(vram: SharedVram) -> Self {
        Self { vram }
    }
}

impl VhwaCompletion for VramCompletion {
    fn complete(&self, submission: &VhwaSubmission, result: VhwaResult<VhwaReply>) {
        let Some(offset) = submission.guest_offset else {
            if let Err(err) = result {
                tracing::debug!(cmd = ?submission.cmd_type(), %err, "host command failed");
            }
            return;
        };
        if let Err(err) = write_guest_result(&*self.vram, offset, &result) {
            tracing::warn!(offset, %err, "could not write command result to vram");
        }
    }
}

pub struct VhwaPipe {
    processor: Arc<CommandElementProcessor>,
    completion: Arc<dyn VhwaCompletion>,
    vram: SharedVram,
}

impl VhwaPipe {
    pub fn new(
        processor: Arc<CommandElementProcessor>,
        completion: Arc<dyn VhwaCompletion>,
        vram: SharedVram,
    ) -> Self {
        Self {
            processor,
            completion,
            vram,
        }
    }

    pub fn processor(&self) -> &Arc<CommandElementProcessor> {
        &self.processor
    }

    /// Routes one command: admin commands run now, the rest are queued.
    pub fn submit(&self, submission: VhwaSubmission) -> Submitted {
        let ty = submission.cmd_type();
        if ty.is_host_only() {
            if submission.is_guest() {
                tracing::warn!(cmd = ?ty, "guest submitted a host-only command");
                return Submitted::Sync(Err(VhwaError::AccessDenied));
            }
            let result = self.run_admin(&submission.cmd);
            tracing::debug!(cmd = ?ty, ok = result.is_ok(), "admin command done");
            return Submitted::Sync(result);
        }

        tracing::trace!(cmd = ?ty, guest = submission.is_guest(), "queueing vhwa command");
        match self.processor.post_vhwa(submission) {
            Ok(()) => Submitted::Async,
            Err(ProcessorError::OutOfMemory) => Submitted::Sync(Err(VhwaError::NoMemory)),
        }
    }

    /// Decodes the guest command at `offset` and submits it. Synchronous outcomes, including
    /// decode failures, are written back into VRAM before returning.
    pub fn submit_guest(&self, offset: u64) -> Submitted {
        let outcome = match read_guest_command(&*self.vram, offset) {
            Ok((_, cmd)) => self.submit(VhwaSubmission::guest(cmd, offset)),
            Err(err) => {
                tracing::warn!(offset, %err, "undecodable guest command");
                Submitted::Sync(Err(err))
            }
        };
        if let Submitted::Sync(result) = &outcome {
            if let Err(err) = write_guest_result(&*self.vram, offset, result) {
                tracing::warn!(offset, %err, "could not write command result to vram");
            }
        }
        outcome
    }

    /// Queues a repaint of a framebuffer area the guest wrote outside VHWA.
    pub fn notify_update(&self, rect: Rect) -> Result<(), ProcessorError> {
        self.processor.post_paint(rect)
    }

    /// Runs `func` on the render thread after everything queued before it.
    pub fn post_func(&self, func: impl FnOnce() + Send + 'static) -> Result<(), ProcessorError> {
        self.processor.post_func(func)
    }

    /// Fails everything still queued, then queues the teardown of every guest surface.
    pub fn reset(&self) -> VhwaResult<()> {
        self.processor.reset(&*self.completion);
        self.processor
            .post_vhwa(VhwaSubmission::host(VhwaCommand::HhReset))
            .map_err(|_| VhwaError::NoMemory)
    }

    fn run_admin(&self, cmd: &VhwaCommand) -> VhwaResult<VhwaReply> {
        match cmd {
            VhwaCommand::HhConstruct(c) => {
                if u64::from(c.vram_size) > self.vram.size() {
                    tracing::warn!(
                        requested = c.vram_size,
                        available = self.vram.size(),
                        "construct with more vram than attached"
                    );
                    return Err(VhwaError::InvalidParameter);
                }
                self.processor
                    .post_vhwa(VhwaSubmission::host(cmd.clone()))
                    .map_err(|_| VhwaError::NoMemory)?;
            }
            VhwaCommand::HhReset => self.reset()?,
            VhwaCommand::HhEnable | VhwaCommand::HhDisable => {}
            VhwaCommand::HhSaveStateSaveBegin => self.processor.disable(),
            VhwaCommand::HhSaveStateSaveEnd => self.processor.enable(),
            VhwaCommand::HhSaveStateSavePerform | VhwaCommand::HhSaveStateLoadPerform => {
                // The stream is not part of the command; hosts call VhwaOverlay directly.
                return Err(VhwaError::NotSupported);
            }
            _ => return Err(VhwaError::InvalidParameter),
        }
        Ok(VhwaReply::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest_cmd::{read_guest_rc, write_guest_command};
    use crate::processor::CommandElement;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use vhwa_overlay::VecVram;
    use vhwa_protocol::status::{VERR_ACCESS_DENIED, VERR_INVALID_STATE};
    use vhwa_protocol::vhwa_cmd::{HhConstruct, SurfDestroy};
    use vhwa_protocol::VhwaCmdType;

    #[derive(Default)]
    struct Completions(Mutex<Vec<(VhwaSubmission, VhwaResult<VhwaReply>)>>);

    impl VhwaCompletion for Completions {
        fn complete(&self, submission: &VhwaSubmission, result: VhwaResult<VhwaReply>) {
            self.0.lock().unwrap().push((submission.clone(), result));
        }
    }

    fn pipe() -> (VhwaPipe, Arc<Completions>, SharedVram) {
        let vram = VecVram::shared(0x10000);
        let done = Arc::new(Completions::default());
        let pipe = VhwaPipe::new(
            Arc::new(CommandElementProcessor::new()),
            done.clone(),
            vram.clone(),
        );
        (pipe, done, vram)
    }

    fn destroy(handle: u64) -> VhwaCommand {
        VhwaCommand::SurfDestroy(SurfDestroy { handle })
    }

    #[test]
    fn surface_commands_are_queued() {
        let (pipe, _, _) = pipe();
        assert!(pipe.submit(VhwaSubmission::guest(destroy(1), 0)).is_async());
        assert_eq!(pipe.processor().len(), 1);
    }

    #[test]
    fn guest_admin_commands_are_denied() {
        let (pipe, _, _) = pipe();
        for cmd in [
            VhwaCommand::HhReset,
            VhwaCommand::HhEnable,
            VhwaCommand::HhSaveStateSaveBegin,
            VhwaCommand::HhConstruct(HhConstruct { vram_size: 0 }),
        ] {
            assert_eq!(
                pipe.submit(VhwaSubmission::guest(cmd, 0)),
                Submitted::Sync(Err(VhwaError::AccessDenied))
            );
        }
        assert!(pipe.processor().is_empty());
        assert!(!pipe.processor().is_disabled());
    }

    #[test]
    fn save_window_disables_the_queue() {
        let (pipe, _, _) = pipe();
        let begin = pipe.submit(VhwaSubmission::host(VhwaCommand::HhSaveStateSaveBegin));
        assert_eq!(begin, Submitted::Sync(Ok(VhwaReply::None)));
        assert!(pipe.processor().is_disabled());

        pipe.submit(VhwaSubmission::guest(destroy(1), 0));
        assert!(pipe.processor().get_cmd().is_none());

        pipe.submit(VhwaSubmission::host(VhwaCommand::HhSaveStateSaveEnd));
        assert!(!pipe.processor().is_disabled());
        assert!(pipe.processor().get_cmd().is_some());
        pipe.processor().done_cmd();
    }

    #[test]
    fn reset_fails_queued_commands_then_queues_teardown() {
        let (pipe, done, _) = pipe();
        pipe.submit(VhwaSubmission::guest(destroy(1), 0x100));
        pipe.submit(VhwaSubmission::guest(destroy(2), 0x200));

        let outcome = pipe.submit(VhwaSubmission::host(VhwaCommand::HhReset));
        assert_eq!(outcome, Submitted::Sync(Ok(VhwaReply::None)));

        let completed = done.0.lock().unwrap();
        assert_eq!(completed.len(), 2);
        assert!(completed
            .iter()
            .all(|(_, r)| *r == Err(VhwaError::InvalidState)));

        match pipe.processor().get_cmd() {
            Some(CommandElement::Vhwa(sub)) => {
                assert_eq!(sub, VhwaSubmission::host(VhwaCommand::HhReset))
            }
            other => panic!("expected the queued reset, got {other:?}"),
        }
        pipe.processor().done_cmd();
    }

    #[test]
    fn construct_checks_vram_size_and_queues_attach() {
        let (pipe, _, vram) = pipe();
        let too_big = HhConstruct {
            vram_size: u32::try_from(vram.size()).unwrap() + 1,
        };
        assert_eq!(
            pipe.submit(VhwaSubmission::host(VhwaCommand::HhConstruct(too_big))),
            Submitted::Sync(Err(VhwaError::InvalidParameter))
        );
        assert!(pipe.processor().is_empty());

        let fits = HhConstruct { vram_size: 0x10000 };
        assert_eq!(
            pipe.submit(VhwaSubmission::host(VhwaCommand::HhConstruct(fits))),
            Submitted::Sync(Ok(VhwaReply::None))
        );
        assert_eq!(pipe.processor().len(), 1);
    }

    #[test]
    fn guest_commands_in_vram_get_sync_status_written_back() {
        let (pipe, _, vram) = pipe();
        write_guest_command(&*vram, 0x40, &VhwaCommand::HhReset, 0).unwrap();
        assert_eq!(
            pipe.submit_guest(0x40),
            Submitted::Sync(Err(VhwaError::AccessDenied))
        );
        assert_eq!(read_guest_rc(&*vram, 0x40).unwrap(), VERR_ACCESS_DENIED);

        write_guest_command(&*vram, 0x80, &destroy(5), 0).unwrap();
        assert!(pipe.submit_guest(0x80).is_async());
        match pipe.processor().get_cmd() {
            Some(CommandElement::Vhwa(sub)) => {
                assert_eq!(sub.cmd_type(), VhwaCmdType::SurfDestroy);
                assert_eq!(sub.guest_offset, Some(0x80));
            }
            other => panic!("expected the queued destroy, got {other:?}"),
        }
        pipe.processor().done_cmd();
    }

    #[test]
    fn vram_completion_writes_guest_status_only() {
        let vram = VecVram::shared(0x1000);
        write_guest_command(&*vram, 0x20, &destroy(1), 0).unwrap();
        let completion = VramCompletion::new(vram.clone());

        completion.complete(
            &VhwaSubmission::guest(destroy(1), 0x20),
            Err(VhwaError::InvalidState),
        );
        assert_eq!(read_guest_rc(&*vram, 0x20).unwrap(), VERR_INVALID_STATE);

        // Host commands leave VRAM alone.
        completion.complete(&VhwaSubmission::host(destroy(1)), Ok(VhwaReply::None));
        assert_eq!(read_guest_rc(&*vram, 0x20).unwrap(), VERR_INVALID_STATE);
    }
}
