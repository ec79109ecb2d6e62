//! Consumer side of the VHWA pipeline, owned by the render thread.
//!
//! [`VhwaOverlay`] pulls elements from the shared [`CommandElementProcessor`], runs them against
//! its [`VhwaImage`], and keeps track of where the GL overlay sits on top of the host's regular
//! framebuffer view. Areas the overlay stops covering are reported back through
//! [`RepaintResult::main_rect`] so the host redraws them from the framebuffer.

use std::io::{Read, Write};
use std::sync::Arc;

use vhwa_overlay::{
    load_state, DirtyRect, FramebufferInfo, GlBackend, Rect, SharedVram, VhwaImage, STATE_VERSION,
};
use vhwa_protocol::{VhwaCommand, VhwaReply, VhwaResult};
use vhwa_snapshot::{ReadLeExt, Result as SnapshotResult, WriteLeExt};

use crate::processor::{CommandElement, CommandElementProcessor, VhwaCompletion};

/// First state version that carries the command queue after the image.
pub const QUEUE_SAVED_VERSION: u32 = 3;

/// What a repaint pass produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepaintResult {
    /// The overlay drew a frame; the host should present its GL surface.
    pub overlay_presented: bool,
    /// Area of the host view, in view coordinates, to redraw from the framebuffer.
    pub main_rect: Option<Rect>,
}

pub struct VhwaOverlay<G: GlBackend> {
    image: VhwaImage<G>,
    processor: Arc<CommandElementProcessor>,
    completion: Arc<dyn VhwaCompletion>,
    vram: SharedVram,
    framebuffer: Option<FramebufferInfo>,
    /// Part of the framebuffer the host view shows, in framebuffer coordinates.
    host_viewport: Rect,
    overlay_viewport: Rect,
    overlay_visible: bool,
    widget_visible: bool,
    /// Overlay widget geometry relative to the host view.
    widget_rect: Rect,
    gl_on: bool,
    need_overlay_repaint: bool,
    main_dirty: DirtyRect,
    /// Commands restored from a checkpoint, run once the framebuffer exists again.
    on_resize: Vec<VhwaCommand>,
}

impl<G: GlBackend> VhwaOverlay<G> {
    pub fn new(
        image: VhwaImage<G>,
        processor: Arc<CommandElementProcessor>,
        completion: Arc<dyn VhwaCompletion>,
        vram: SharedVram,
    ) -> Self {
        Self {
            image,
            processor,
            completion,
            vram,
            framebuffer: None,
            host_viewport: Rect::default(),
            overlay_viewport: Rect::default(),
            overlay_visible: false,
            widget_visible: false,
            widget_rect: Rect::default(),
            gl_on: false,
            need_overlay_repaint: false,
            main_dirty: DirtyRect::new(),
            on_resize: Vec::new(),
        }
    }

    pub fn image(&self) -> &VhwaImage<G> {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut VhwaImage<G> {
        &mut self.image
    }

    pub fn processor(&self) -> &Arc<CommandElementProcessor> {
        &self.processor
    }

    pub fn gl_on(&self) -> bool {
        self.gl_on
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible
    }

    pub fn overlay_viewport(&self) -> Rect {
        self.overlay_viewport
    }

    pub fn widget_visible(&self) -> bool {
        self.widget_visible
    }

    pub fn widget_rect(&self) -> Rect {
        self.widget_rect
    }

    pub fn main_dirty(&self) -> &DirtyRect {
        &self.main_dirty
    }

    pub fn needs_overlay_repaint(&self) -> bool {
        self.need_overlay_repaint
    }

    pub fn pending_on_resize(&self) -> &[VhwaCommand] {
        &self.on_resize
    }

    /// Runs at most one queued element. Returns whether one was taken.
    pub fn process_next(&mut self) -> bool {
        let Some(element) = self.processor.get_cmd() else {
            return false;
        };
        self.process_cmd(element);
        self.processor.done_cmd();
        true
    }

    /// Handler for one wake-up from the processor: run an element, then repaint.
    pub fn on_notify(&mut self) -> RepaintResult {
        self.process_next();
        self.repaint()
    }

    /// Runs queued elements until the processor hands out no more. Returns how many ran.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while self.process_next() {
            count += 1;
        }
        count
    }

    fn process_cmd(&mut self, element: CommandElement) {
        match element {
            CommandElement::Paint(rect) => self.add_main_dirty_rect(rect),
            CommandElement::Vhwa(sub) => {
                let result = self.execute(&sub.cmd);
                tracing::debug!(
                    cmd = ?sub.cmd_type(),
                    guest = sub.is_guest(),
                    ok = result.is_ok(),
                    "vhwa command done"
                );
                self.completion.complete(&sub, result);
            }
            CommandElement::Func(func) => func(),
        }
    }

    /// Executes one command and refreshes overlay placement after topology changes.
    pub fn execute(&mut self, cmd: &VhwaCommand) -> VhwaResult<VhwaReply> {
        match cmd {
            VhwaCommand::SurfCreate(_) => {
                self.set_gl_on(true);
                let result = self.image.execute(cmd);
                self.after_surface_set_change();
                result
            }
            VhwaCommand::SurfDestroy(_) => {
                let result = self.image.execute(cmd);
                self.after_surface_set_change();
                result
            }
            VhwaCommand::SurfUnlock(_) => {
                let result = self.image.execute(cmd);
                self.need_overlay_repaint = true;
                let vga_dirty = self
                    .image
                    .display()
                    .vga()
                    .and_then(|v| self.image.display().surface(v))
                    .map(|s| *s.dirty());
                if let Some(dirty) = vga_dirty {
                    self.main_dirty.add_dirty(&dirty);
                }
                result
            }
            VhwaCommand::SurfBlt(_) | VhwaCommand::SurfFlip(_) | VhwaCommand::SurfColorFill(_) => {
                let result = self.image.execute(cmd);
                self.need_overlay_repaint = true;
                result
            }
            VhwaCommand::SurfOverlayUpdate(_) | VhwaCommand::SurfOverlaySetPosition(_) => {
                let result = self.image.execute(cmd);
                self.refresh_overlay_viewport();
                self.check_update_viewport();
                self.need_overlay_repaint = true;
                result
            }
            VhwaCommand::SurfColorkeySet(_) => {
                let result = self.image.execute(cmd);
                self.check_update_viewport();
                self.need_overlay_repaint = true;
                result
            }
            VhwaCommand::HhConstruct(_) => {
                self.image.construct(self.vram.clone());
                Ok(VhwaReply::None)
            }
            VhwaCommand::HhReset => {
                let teardown = self.image.reset();
                tracing::debug!(commands = teardown.len(), "tearing down guest surfaces");
                for cmd in teardown {
                    if let Err(err) = self.execute(&cmd) {
                        tracing::warn!(cmd = ?cmd.cmd_type(), %err, "teardown command failed");
                    }
                }
                Ok(VhwaReply::None)
            }
            _ => self.image.execute(cmd),
        }
    }

    fn after_surface_set_change(&mut self) {
        if !self.image.has_surfaces() {
            self.set_gl_on(false);
            return;
        }
        self.refresh_overlay_viewport();
        self.check_update_viewport();
        self.need_overlay_repaint = true;
    }

    fn refresh_overlay_viewport(&mut self) {
        self.overlay_visible = self.image.has_visible_overlays();
        if self.overlay_visible {
            self.overlay_viewport = self.image.overlays_rect_union();
        }
    }

    fn check_update_viewport(&mut self) {
        if !self.overlay_visible {
            self.show_overlay(false);
            return;
        }
        let over_vp = self.host_viewport.intersected(&self.overlay_viewport);
        if over_vp.is_empty() {
            self.show_overlay(false);
            return;
        }
        let moved = over_vp != self.image.viewport();
        self.widget_rect = Rect::new(
            over_vp.x - self.host_viewport.x,
            over_vp.y - self.host_viewport.y,
            over_vp.w,
            over_vp.h,
        );
        self.show_overlay(true);
        // Run even for an unchanged rect: it re-derives overlay coverage and active keys.
        self.image.update_viewport(over_vp);
        if moved {
            self.need_overlay_repaint = true;
        }
    }

    fn show_overlay(&mut self, show: bool) {
        if self.widget_visible == show {
            return;
        }
        self.widget_visible = show;
        if !show {
            // The framebuffer view must redraw what the overlay covered.
            self.main_dirty.add(self.image.viewport());
        }
    }

    fn set_gl_on(&mut self, on: bool) {
        if self.gl_on == on {
            return;
        }
        self.gl_on = on;
        tracing::info!(on, "switching gl overlay mode");
        self.overlay_visible = false;
        self.show_overlay(false);
        if on {
            self.sync_gl();
        }
    }

    /// Brings the VGA surface in line with the host framebuffer. Returns whether it changed.
    fn sync_gl(&mut self) -> bool {
        let Some(fb) = self.framebuffer else {
            return false;
        };
        if self.image.vga_matches(&fb) {
            return false;
        }
        self.image.resize(&fb);
        true
    }

    fn add_main_dirty_rect(&mut self, rect: Rect) {
        self.main_dirty.add(rect);
        if self.gl_on {
            self.image.update_rect(rect);
            self.need_overlay_repaint = true;
        }
    }

    /// Host framebuffer changed size or format.
    ///
    /// The host view is reset to the whole framebuffer; call [`Self::set_host_viewport`]
    /// afterwards for scrolled views. Commands restored by [`Self::load_state`] run here.
    pub fn resize(&mut self, fb: &FramebufferInfo) {
        self.framebuffer = Some(*fb);
        self.host_viewport = Rect::from_size(
            i32::try_from(fb.width).unwrap_or(i32::MAX),
            i32::try_from(fb.height).unwrap_or(i32::MAX),
        );

        if self.gl_on {
            self.need_overlay_repaint = self.sync_gl();
            if !self.image.has_surfaces() {
                self.set_gl_on(false);
            }
        }

        let restored = std::mem::take(&mut self.on_resize);
        if !restored.is_empty() {
            tracing::debug!(commands = restored.len(), "replaying restored commands");
        }
        for cmd in restored {
            if let Err(err) = self.execute(&cmd) {
                tracing::warn!(cmd = ?cmd.cmd_type(), %err, "restored command failed");
            }
        }

        self.repaint_overlay();
    }

    /// Moves the host view over the framebuffer, e.g. after scrolling.
    pub fn set_host_viewport(&mut self, rect: Rect) {
        self.host_viewport = rect;
        if self.gl_on {
            self.check_update_viewport();
        }
    }

    fn repaint_overlay(&mut self) -> bool {
        if !self.need_overlay_repaint {
            return false;
        }
        self.need_overlay_repaint = false;
        self.overlay_visible && self.image.perform_display(false)
    }

    fn repaint_main(&mut self) -> Option<Rect> {
        let rect = self.main_dirty.rect()?;
        if self.widget_visible && self.overlay_viewport.contains_rect(&rect) {
            return None;
        }
        self.main_dirty.clear();
        Some(Rect::new(
            rect.x - self.host_viewport.x,
            rect.y - self.host_viewport.y,
            rect.w,
            rect.h,
        ))
    }

    /// Draws the overlay if anything changed, then reports the framebuffer area to redraw.
    pub fn repaint(&mut self) -> RepaintResult {
        let overlay_presented = self.repaint_overlay();
        RepaintResult {
            overlay_presented,
            main_rect: self.repaint_main(),
        }
    }

    /// Writes the state version, the surface topology and the command queue.
    ///
    /// Call with the queue disabled (between `HH_SAVESTATE_SAVEBEGIN` and `SAVEEND`).
    pub fn save_state<W: Write>(&self, w: &mut W) -> SnapshotResult<()> {
        w.write_u32_le(STATE_VERSION)?;
        self.image.save_state(w)?;
        self.processor.save_state(w)
    }

    /// Restores what [`Self::save_state`] wrote. Surface commands wait for the next
    /// [`Self::resize`]; queued guest commands go straight back into the processor.
    pub fn load_state<R: Read>(&mut self, r: &mut R) -> SnapshotResult<()> {
        let version = match r.read_u32_le() {
            Ok(version) => version,
            // Older streams may end before the overlay unit.
            Err(err) if err.is_eof() => {
                tracing::debug!("no overlay state in stream");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        self.on_resize = load_state(r, version)?;
        tracing::debug!(version, commands = self.on_resize.len(), "overlay state loaded");
        if version >= QUEUE_SAVED_VERSION {
            self.processor.load_state(r, &*self.vram)?;
        }
        Ok(())
    }
}
