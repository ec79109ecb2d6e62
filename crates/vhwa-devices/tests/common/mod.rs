#![allow(dead_code)]

use std::sync::Arc;

use vhwa_devices::guest_cmd::{read_guest_command, read_guest_rc, write_guest_command};
use vhwa_devices::{
    CommandElementProcessor, Submitted, VhwaOverlay, VhwaPipe, VhwaSubmission, VramCompletion,
};
use vhwa_overlay::{
    FramebufferInfo, GlCaps, RecordingGl, SharedVram, VecVram, Vram, VhwaImage, VhwaInfo,
    VhwaSettings,
};
use vhwa_protocol::status::VINF_SUCCESS;
use vhwa_protocol::vhwa_cmd::{
    HhConstruct, OverlayFx, PixelFormatDesc, RectL, SurfOverlayUpdate, SurfaceDesc,
};
use vhwa_protocol::vhwa_flags::{OverlayFlags, SurfCaps, SurfDescFlags, VHWA_OFFSET64_VOID};
use vhwa_protocol::VhwaCommand;

pub const VRAM_SIZE: usize = 16 << 20;
pub const SCREEN_W: u32 = 640;
pub const SCREEN_H: u32 = 480;
/// Guest command buffers live at the top of VRAM, well clear of surface memory.
pub const CMD_AREA: u64 = 0xf0_0000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub struct Rig {
    pub vram: SharedVram,
    pub pipe: VhwaPipe,
    pub overlay: VhwaOverlay<RecordingGl>,
    next_cmd: u64,
}

pub fn new_overlay(vram: &SharedVram) -> VhwaOverlay<RecordingGl> {
    let processor = Arc::new(CommandElementProcessor::new());
    let image = VhwaImage::new(
        RecordingGl::new(),
        VhwaInfo::new(GlCaps::full()),
        VhwaSettings::default(),
    );
    VhwaOverlay::new(
        image,
        processor,
        Arc::new(VramCompletion::new(vram.clone())),
        vram.clone(),
    )
}

impl Rig {
    /// A constructed pipeline with a host framebuffer of `SCREEN_W` x `SCREEN_H`.
    pub fn new() -> Self {
        init_tracing();
        let vram = VecVram::shared(VRAM_SIZE);
        let overlay = new_overlay(&vram);
        Self::attach(vram, overlay)
    }

    pub fn attach(vram: SharedVram, mut overlay: VhwaOverlay<RecordingGl>) -> Self {
        let pipe = VhwaPipe::new(
            Arc::clone(overlay.processor()),
            Arc::new(VramCompletion::new(vram.clone())),
            vram.clone(),
        );
        let construct = pipe.submit(VhwaSubmission::host(VhwaCommand::HhConstruct(
            HhConstruct {
                vram_size: VRAM_SIZE as u32,
            },
        )));
        assert_eq!(construct, Submitted::Sync(Ok(vhwa_protocol::VhwaReply::None)));
        overlay.drain();
        overlay.resize(&FramebufferInfo::bgr32(SCREEN_W, SCREEN_H, Some(0)));
        Self {
            vram,
            pipe,
            overlay,
            next_cmd: CMD_AREA,
        }
    }

    /// Stages `cmd` in VRAM and submits it as the guest would. Returns the command's offset.
    pub fn guest(&mut self, cmd: &VhwaCommand) -> u64 {
        let offset = self.next_cmd;
        self.next_cmd += 0x400;
        assert!(self.vram.contains(offset, 0x400));
        write_guest_command(&*self.vram, offset, cmd, 0).unwrap();
        let submitted = self.pipe.submit_guest(offset);
        assert!(submitted.is_async(), "{cmd:?} was not queued: {submitted:?}");
        offset
    }

    /// Submits, drains, and checks the guest saw success.
    pub fn guest_ok(&mut self, cmd: &VhwaCommand) -> u64 {
        let offset = self.guest(cmd);
        self.overlay.drain();
        assert_eq!(self.rc(offset), VINF_SUCCESS, "{cmd:?} failed");
        offset
    }

    /// Creates a surface through the guest path and returns the handle the host assigned.
    pub fn create(&mut self, desc: &SurfaceDesc) -> u64 {
        let offset = self.guest_ok(&VhwaCommand::SurfCreate(*desc));
        match read_guest_command(&*self.vram, offset).unwrap().1 {
            VhwaCommand::SurfCreate(done) => done.handle,
            other => panic!("command changed type: {other:?}"),
        }
    }

    pub fn rc(&self, offset: u64) -> i32 {
        read_guest_rc(&*self.vram, offset).unwrap()
    }
}

pub fn primary_desc() -> SurfaceDesc {
    SurfaceDesc {
        flags: SurfDescFlags::CAPS | SurfDescFlags::WIDTH | SurfDescFlags::HEIGHT,
        width: SCREEN_W,
        height: SCREEN_H,
        pixel_format: PixelFormatDesc::rgb(32, 0xff_0000, 0xff00, 0xff),
        surf_caps: SurfCaps::PRIMARYSURFACE | SurfCaps::VISIBLE,
        offset: 0,
        ..Default::default()
    }
}

pub fn overlay_desc(fourcc: u32, width: u32, height: u32, offset: u64) -> SurfaceDesc {
    SurfaceDesc {
        flags: SurfDescFlags::CAPS
            | SurfDescFlags::WIDTH
            | SurfDescFlags::HEIGHT
            | SurfDescFlags::PIXELFORMAT,
        width,
        height,
        pixel_format: PixelFormatDesc::fourcc(fourcc),
        surf_caps: SurfCaps::OVERLAY | SurfCaps::FLIP,
        offset,
        ..Default::default()
    }
}

pub fn overlay_update(src: u64, dst: u64, dst_rect: RectL, flags: OverlayFlags) -> VhwaCommand {
    VhwaCommand::SurfOverlayUpdate(SurfOverlayUpdate {
        dst_handle: dst,
        dst_offset: VHWA_OFFSET64_VOID,
        dst_rect,
        src_handle: src,
        src_offset: VHWA_OFFSET64_VOID,
        src_rect: RectL::new(0, 0, dst_rect.right - dst_rect.left, dst_rect.bottom - dst_rect.top),
        flags,
        updated_src_mem: None,
        fx: OverlayFx::default(),
    })
}
