//! FIFO between the threads that submit VHWA work and the render thread that runs it.
//!
//! Producers post [`CommandElement`]s from any thread. The render thread pulls one element at a
//! time with [`CommandElementProcessor::get_cmd`] and releases it with
//! [`CommandElementProcessor::done_cmd`]; at most one element is in flight. Admin operations
//! (reset, disable) wait for the in-flight element before touching the queue.
//!
//! The queue is checkpointed as a magic-delimited record list:
//!
//! ```text
//! u32 LIST_BEGIN_MAGIC, u32 pending_notifications, bool
//! { u32 ELEMENT_PAINT, i32 x, i32 y, i32 w, i32 h, bool }
//! { u32 ELEMENT_VHWA, u32 vram_offset, bool }
//! u32 LIST_END_MAGIC
//! ```
//!
//! Only paints and guest-originated commands are written. Host commands are rebuilt by whoever
//! issued them, and callbacks cannot be saved at all.

use std::collections::VecDeque;
use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use vhwa_overlay::{Rect, Vram};
use vhwa_protocol::{VhwaCmdType, VhwaCommand, VhwaError, VhwaReply, VhwaResult};
use vhwa_snapshot::{ReadLeExt, Result as SnapshotResult, SnapshotError, WriteLeExt};

use crate::guest_cmd::read_guest_command;

pub const LIST_BEGIN_MAGIC: u32 = 0x89ab_cdef;
pub const LIST_END_MAGIC: u32 = 0xfedc_ba98;

const ELEMENT_PAINT: u32 = 1;
const ELEMENT_VHWA: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProcessorError {
    #[error("out of memory queueing a command element")]
    OutOfMemory,
}

/// A decoded VHWA command travelling through the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhwaSubmission {
    pub cmd: VhwaCommand,
    /// VRAM offset of the guest's command header; `None` for commands the host built itself.
    pub guest_offset: Option<u64>,
}

impl VhwaSubmission {
    pub fn guest(cmd: VhwaCommand, offset: u64) -> Self {
        Self {
            cmd,
            guest_offset: Some(offset),
        }
    }

    pub fn host(cmd: VhwaCommand) -> Self {
        Self {
            cmd,
            guest_offset: None,
        }
    }

    pub fn is_guest(&self) -> bool {
        self.guest_offset.is_some()
    }

    pub fn cmd_type(&self) -> VhwaCmdType {
        self.cmd.cmd_type()
    }
}

/// Host callback run on the render thread in queue order.
pub type CommandFunc = Box<dyn FnOnce() + Send>;

pub enum CommandElement {
    /// Framebuffer area the guest wrote through the plain VGA path.
    Paint(Rect),
    Vhwa(VhwaSubmission),
    Func(CommandFunc),
}

impl fmt::Debug for CommandElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paint(rect) => f.debug_tuple("Paint").field(rect).finish(),
            Self::Vhwa(sub) => f.debug_tuple("Vhwa").field(sub).finish(),
            Self::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// Receives the result of every asynchronously executed VHWA command.
///
/// Called exactly once per [`VhwaSubmission`] that entered the queue, either by the render
/// thread after running it or by [`CommandElementProcessor::reset`] with
/// [`VhwaError::InvalidState`].
pub trait VhwaCompletion: Send + Sync {
    fn complete(&self, submission: &VhwaSubmission, result: VhwaResult<VhwaReply>);
}

/// Wakes the render thread. One call means one element may be waiting.
pub trait CommandNotify: Send + Sync {
    fn notify(&self);
}

#[derive(Default)]
struct State {
    queue: VecDeque<CommandElement>,
    in_flight: bool,
    resetting: bool,
    disabled: u32,
    target: Option<Arc<dyn CommandNotify>>,
}

pub struct CommandElementProcessor {
    state: Mutex<State>,
    idle: Condvar,
    /// Notifications handed to a target and not yet returned.
    notifying: AtomicU32,
}

impl Default for CommandElementProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandElementProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("CommandElementProcessor")
            .field("queued", &state.queue.len())
            .field("in_flight", &state.in_flight)
            .field("resetting", &state.resetting)
            .field("disabled", &state.disabled)
            .field("has_target", &state.target.is_some())
            .finish()
    }
}

impl CommandElementProcessor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            idle: Condvar::new(),
            notifying: AtomicU32::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_idle<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.idle
            .wait_while(guard, |s| s.in_flight)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, target: &Arc<dyn CommandNotify>, count: usize) {
        if count == 0 {
            return;
        }
        self.notifying.fetch_add(1, Ordering::AcqRel);
        for _ in 0..count {
            target.notify();
        }
        self.notifying.fetch_sub(1, Ordering::AcqRel);
    }

    /// Appends `element` and wakes the current target once.
    pub fn post_cmd(&self, element: CommandElement) -> Result<(), ProcessorError> {
        let target = {
            let mut state = self.lock();
            state
                .queue
                .try_reserve(1)
                .map_err(|_| ProcessorError::OutOfMemory)?;
            state.queue.push_back(element);
            state.target.clone()
        };
        if let Some(target) = target {
            self.notify(&target, 1);
        }
        Ok(())
    }

    pub fn post_paint(&self, rect: Rect) -> Result<(), ProcessorError> {
        self.post_cmd(CommandElement::Paint(rect))
    }

    pub fn post_vhwa(&self, submission: VhwaSubmission) -> Result<(), ProcessorError> {
        self.post_cmd(CommandElement::Vhwa(submission))
    }

    pub fn post_func(&self, func: impl FnOnce() + Send + 'static) -> Result<(), ProcessorError> {
        self.post_cmd(CommandElement::Func(Box::new(func)))
    }

    /// Takes the oldest element and marks it in flight.
    ///
    /// Returns `None` during a reset, while disabled, or when another element is still in
    /// flight. A disabled processor with queued work re-notifies so draining resumes once it is
    /// enabled again.
    pub fn get_cmd(&self) -> Option<CommandElement> {
        let mut state = self.lock();
        if state.resetting {
            return None;
        }
        if state.disabled > 0 {
            let target = if state.queue.is_empty() {
                None
            } else {
                state.target.clone()
            };
            drop(state);
            if let Some(target) = target {
                self.notify(&target, 1);
            }
            return None;
        }
        if state.in_flight {
            debug_assert!(false, "get_cmd called with an element in flight");
            tracing::warn!("get_cmd called with an element in flight");
            return None;
        }
        let element = state.queue.pop_front()?;
        state.in_flight = true;
        Some(element)
    }

    /// Releases the element returned by the last successful [`Self::get_cmd`].
    pub fn done_cmd(&self) {
        let mut state = self.lock();
        debug_assert!(state.in_flight, "done_cmd without an element in flight");
        state.in_flight = false;
        drop(state);
        self.idle.notify_all();
    }

    /// Drops everything queued, failing each VHWA command with [`VhwaError::InvalidState`].
    ///
    /// Blocks until the in-flight element is done, so it must not be called from the render
    /// thread while that thread holds an element.
    pub fn reset(&self, completion: &dyn VhwaCompletion) {
        let drained = {
            let mut state = self.lock();
            state.resetting = true;
            let mut state = self.wait_idle(state);
            std::mem::take(&mut state.queue)
        };

        let mut failed = 0usize;
        for element in drained {
            match element {
                CommandElement::Vhwa(sub) => {
                    completion.complete(&sub, Err(VhwaError::InvalidState));
                    failed += 1;
                }
                CommandElement::Paint(_) => {}
                CommandElement::Func(_) => {
                    tracing::warn!("host callback dropped by queue reset");
                }
            }
        }
        tracing::debug!(failed, "command queue reset");

        self.lock().resetting = false;
    }

    /// Stops [`Self::get_cmd`] from handing out elements. Nests with [`Self::enable`].
    pub fn disable(&self) {
        let state = self.lock();
        let mut state = self.wait_idle(state);
        state.disabled += 1;
        tracing::debug!(depth = state.disabled, "command queue disabled");
    }

    pub fn enable(&self) {
        let mut state = self.lock();
        match state.disabled.checked_sub(1) {
            Some(depth) => {
                state.disabled = depth;
                tracing::debug!(depth, "command queue enabled");
            }
            None => tracing::warn!("enable without a matching disable"),
        }
    }

    /// Replaces the wake-up target. A new target is notified once per element already queued.
    pub fn set_notify_object(&self, target: Option<Arc<dyn CommandNotify>>) {
        let (target, queued) = {
            let mut state = self.lock();
            let same = match (&state.target, &target) {
                (Some(old), Some(new)) => std::ptr::addr_eq(Arc::as_ptr(old), Arc::as_ptr(new)),
                (None, None) => true,
                _ => false,
            };
            if same {
                return;
            }
            state.target = target.clone();
            (target, state.queue.len())
        };
        if let Some(target) = target {
            self.notify(&target, queued);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn is_disabled(&self) -> bool {
        self.lock().disabled > 0
    }

    pub fn has_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    /// Writes the queue in the record format described at the top of this module.
    pub fn save_state<W: Write>(&self, w: &mut W) -> SnapshotResult<()> {
        let state = self.lock();
        w.write_u32_le(LIST_BEGIN_MAGIC)?;
        w.write_u32_le(self.notifying.load(Ordering::Acquire))?;
        w.write_bool(true)?;

        for element in &state.queue {
            match element {
                CommandElement::Paint(rect) => {
                    w.write_u32_le(ELEMENT_PAINT)?;
                    w.write_i32_le(rect.x)?;
                    w.write_i32_le(rect.y)?;
                    w.write_i32_le(rect.w)?;
                    w.write_i32_le(rect.h)?;
                    w.write_bool(true)?;
                }
                CommandElement::Vhwa(sub) => {
                    let Some(offset) = sub.guest_offset else {
                        continue;
                    };
                    let offset = u32::try_from(offset)
                        .map_err(|_| SnapshotError::Corrupt("queued command beyond 4 GiB"))?;
                    w.write_u32_le(ELEMENT_VHWA)?;
                    w.write_u32_le(offset)?;
                    w.write_bool(true)?;
                }
                CommandElement::Func(_) => {
                    return Err(SnapshotError::Transient("host callback in command queue"));
                }
            }
        }

        w.write_u32_le(LIST_END_MAGIC)
    }

    /// Re-posts every saved record. VHWA records are decoded again from `vram`.
    pub fn load_state<R: Read>(&self, r: &mut R, vram: &dyn Vram) -> SnapshotResult<()> {
        r.expect_magic_u32(LIST_BEGIN_MAGIC)?;
        let _pending = r.read_u32_le()?;
        let _ = r.read_bool()?;

        let mut loaded = 0usize;
        loop {
            let element = match r.read_u32_le()? {
                ELEMENT_PAINT => {
                    let x = r.read_i32_le()?;
                    let y = r.read_i32_le()?;
                    let w = r.read_i32_le()?;
                    let h = r.read_i32_le()?;
                    let _ = r.read_bool()?;
                    CommandElement::Paint(Rect::new(x, y, w, h))
                }
                ELEMENT_VHWA => {
                    let offset = u64::from(r.read_u32_le()?);
                    let _ = r.read_bool()?;
                    let (_, cmd) = read_guest_command(vram, offset).map_err(|err| {
                        tracing::warn!(offset, %err, "saved command no longer decodes");
                        SnapshotError::Corrupt("saved command no longer decodes")
                    })?;
                    CommandElement::Vhwa(VhwaSubmission::guest(cmd, offset))
                }
                LIST_END_MAGIC => break,
                other => {
                    tracing::warn!(record = other, "unknown command queue record");
                    return Err(SnapshotError::Corrupt("unknown command queue record"));
                }
            };
            self.post_cmd(element).map_err(|_| SnapshotError::OutOfMemory {
                len: std::mem::size_of::<CommandElement>(),
            })?;
            loaded += 1;
        }
        tracing::debug!(loaded, "command queue loaded");
        Ok(())
    }
}
