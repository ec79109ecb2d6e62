#![allow(dead_code)]

use vhwa_overlay::{
    FramebufferInfo, GlCaps, RecordingGl, SharedVram, VecVram, VhwaImage, VhwaInfo, VhwaSettings,
};
use vhwa_protocol::vhwa_cmd::{
    OverlayFx, PixelFormatDesc, RectL, SurfOverlayUpdate, SurfaceDesc,
};
use vhwa_protocol::vhwa_flags::{OverlayFlags, SurfCaps, SurfDescFlags, VHWA_OFFSET64_VOID};
use vhwa_protocol::{VhwaCommand, VhwaReply};

pub const VRAM_SIZE: usize = 16 << 20;
pub const SCREEN_W: u32 = 640;
pub const SCREEN_H: u32 = 480;

pub fn image_with_vram() -> (VhwaImage<RecordingGl>, SharedVram) {
    let vram = VecVram::shared(VRAM_SIZE);
    let mut image = VhwaImage::new(
        RecordingGl::new(),
        VhwaInfo::new(GlCaps::full()),
        VhwaSettings::default(),
    );
    image.construct(vram.clone());
    image.resize(&FramebufferInfo::bgr32(SCREEN_W, SCREEN_H, Some(0)));
    (image, vram)
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

pub fn overlay_desc(
    fourcc: u32,
    width: u32,
    height: u32,
    back_buffers: u32,
    offset: u64,
) -> SurfaceDesc {
    let mut surf_caps = SurfCaps::OVERLAY | SurfCaps::FLIP;
    if back_buffers != 0 {
        surf_caps |= SurfCaps::COMPLEX;
    }
    SurfaceDesc {
        flags: SurfDescFlags::CAPS
            | SurfDescFlags::WIDTH
            | SurfDescFlags::HEIGHT
            | SurfDescFlags::PIXELFORMAT,
        width,
        height,
        back_buffers,
        pixel_format: PixelFormatDesc::fourcc(fourcc),
        surf_caps,
        offset,
        ..Default::default()
    }
}

/// Creates a surface and returns the handle it ended up with.
pub fn create(image: &mut VhwaImage<RecordingGl>, desc: &SurfaceDesc) -> u64 {
    match image.execute(&VhwaCommand::SurfCreate(*desc)) {
        Ok(VhwaReply::SurfaceInfo {
            handle: Some(handle),
            ..
        }) => handle,
        Ok(VhwaReply::SurfaceInfo { handle: None, .. }) => desc.handle,
        other => panic!("surface create failed: {other:?}"),
    }
}

pub fn show_overlay(src: u64, dst: u64, dst_rect: RectL, src_rect: RectL) -> VhwaCommand {
    VhwaCommand::SurfOverlayUpdate(SurfOverlayUpdate {
        dst_handle: dst,
        dst_offset: VHWA_OFFSET64_VOID,
        dst_rect,
        src_handle: src,
        src_offset: VHWA_OFFSET64_VOID,
        src_rect,
        flags: OverlayFlags::SHOW | OverlayFlags::KEYDEST,
        updated_src_mem: None,
        fx: OverlayFx::default(),
    })
}
