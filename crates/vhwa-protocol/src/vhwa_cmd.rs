//! VHWA command header and body layouts.
//!
//! A command in VRAM is a [`VhwaCmdHdr`] immediately followed by its body. Bodies carry both the
//! guest's inputs and the host's outputs; outputs overwrite the input fields in place, so
//! [`VhwaReply::write_to_body`] patches a copy of the original body rather than encoding a fresh
//! one.

use crate::le::{LeReader, LeWriter};
use crate::status::{VhwaError, VhwaResult};
use crate::vhwa_flags::{
    Caps, Caps2, ColorKeyCaps, ColorKeyFlags, OverlayFlags, PixelFormatFlags, SurfCaps,
    SurfDescFlags,
};

/// Set in [`VhwaCmdHdr::flags`] for commands the host built for itself.
pub const VHWACMD_FLAG_HH_CMD: u32 = 1 << 0;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VhwaCmdType {
    SurfCanCreate = 1,
    SurfCreate = 2,
    SurfDestroy = 3,
    SurfLock = 4,
    SurfUnlock = 5,
    SurfBlt = 6,
    SurfFlip = 7,
    SurfOverlayUpdate = 8,
    SurfOverlaySetPosition = 9,
    SurfColorkeySet = 10,
    QueryInfo1 = 11,
    QueryInfo2 = 12,
    Enable = 13,
    Disable = 14,
    HhConstruct = 15,
    HhReset = 16,
    SurfGetInfo = 17,
    SurfColorFill = 18,
    HhDisable = 19,
    HhEnable = 20,
    HhSaveStateSaveBegin = 21,
    HhSaveStateSaveEnd = 22,
    HhSaveStateSavePerform = 23,
    HhSaveStateLoadPerform = 24,
}

impl VhwaCmdType {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::SurfCanCreate),
            2 => Some(Self::SurfCreate),
            3 => Some(Self::SurfDestroy),
            4 => Some(Self::SurfLock),
            5 => Some(Self::SurfUnlock),
            6 => Some(Self::SurfBlt),
            7 => Some(Self::SurfFlip),
            8 => Some(Self::SurfOverlayUpdate),
            9 => Some(Self::SurfOverlaySetPosition),
            10 => Some(Self::SurfColorkeySet),
            11 => Some(Self::QueryInfo1),
            12 => Some(Self::QueryInfo2),
            13 => Some(Self::Enable),
            14 => Some(Self::Disable),
            15 => Some(Self::HhConstruct),
            16 => Some(Self::HhReset),
            17 => Some(Self::SurfGetInfo),
            18 => Some(Self::SurfColorFill),
            19 => Some(Self::HhDisable),
            20 => Some(Self::HhEnable),
            21 => Some(Self::HhSaveStateSaveBegin),
            22 => Some(Self::HhSaveStateSaveEnd),
            23 => Some(Self::HhSaveStateSavePerform),
            24 => Some(Self::HhSaveStateLoadPerform),
            _ => None,
        }
    }

    /// Host-to-host administrative commands. They run synchronously on the submitting thread
    /// and are refused when they arrive from the guest.
    pub const fn is_host_only(self) -> bool {
        matches!(
            self,
            Self::HhConstruct
                | Self::HhReset
                | Self::HhDisable
                | Self::HhEnable
                | Self::HhSaveStateSaveBegin
                | Self::HhSaveStateSaveEnd
                | Self::HhSaveStateSavePerform
                | Self::HhSaveStateLoadPerform
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VhwaCmdHdr {
    pub cmd_type: u32,
    pub rc: i32,
    pub display: i32,
    pub flags: u32,
    pub reserved0: u64,
    pub reserved1: u64,
}

impl VhwaCmdHdr {
    pub const SIZE_BYTES: usize = 32;
    /// Byte offset of `rc`; completion paths patch only this field.
    pub const RC_OFFSET: usize = 4;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::new(buf);
        Some(Self {
            cmd_type: r.u32(),
            rc: r.i32(),
            display: r.i32(),
            flags: r.u32(),
            reserved0: r.u64(),
            reserved1: r.u64(),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        let mut w = LeWriter::new(&mut out);
        w.u32(self.cmd_type);
        w.i32(self.rc);
        w.i32(self.display);
        w.u32(self.flags);
        w.u64(self.reserved0);
        w.u64(self.reserved1);
        out
    }

    pub fn is_host_cmd(&self) -> bool {
        self.flags & VHWACMD_FLAG_HH_CMD != 0
    }
}

/// Guest rectangle; `right`/`bottom` are exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RectL {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl RectL {
    pub const SIZE_BYTES: usize = 16;

    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    fn read(r: &mut LeReader<'_>) -> Self {
        Self {
            left: r.i32(),
            top: r.i32(),
            right: r.i32(),
            bottom: r.i32(),
        }
    }

    fn write(&self, w: &mut LeWriter<'_>) {
        w.i32(self.left);
        w.i32(self.top);
        w.i32(self.right);
        w.i32(self.bottom);
    }
}

/// Raw color key range as the guest encodes it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ColorKeyDesc {
    pub low: u32,
    pub high: u32,
}

impl ColorKeyDesc {
    pub const SIZE_BYTES: usize = 8;

    fn read(r: &mut LeReader<'_>) -> Self {
        Self {
            low: r.u32(),
            high: r.u32(),
        }
    }

    fn write(&self, w: &mut LeWriter<'_>) {
        w.u32(self.low);
        w.u32(self.high);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelFormatDesc {
    pub flags: PixelFormatFlags,
    pub fourcc: u32,
    pub bit_count: u32,
    pub r_mask: u32,
    pub g_mask: u32,
    pub b_mask: u32,
    pub a_mask: u32,
}

impl PixelFormatDesc {
    pub const SIZE_BYTES: usize = 28;

    pub const fn rgb(bit_count: u32, r_mask: u32, g_mask: u32, b_mask: u32) -> Self {
        Self {
            flags: PixelFormatFlags::RGB,
            fourcc: 0,
            bit_count,
            r_mask,
            g_mask,
            b_mask,
            a_mask: 0,
        }
    }

    pub const fn fourcc(fourcc: u32) -> Self {
        Self {
            flags: PixelFormatFlags::FOURCC,
            fourcc,
            bit_count: 0,
            r_mask: 0,
            g_mask: 0,
            b_mask: 0,
            a_mask: 0,
        }
    }

    fn read(r: &mut LeReader<'_>) -> Self {
        Self {
            flags: PixelFormatFlags::from_bits_retain(r.u32()),
            fourcc: r.u32(),
            bit_count: r.u32(),
            r_mask: r.u32(),
            g_mask: r.u32(),
            b_mask: r.u32(),
            a_mask: r.u32(),
        }
    }

    fn write(&self, w: &mut LeWriter<'_>) {
        w.u32(self.flags.bits());
        w.u32(self.fourcc);
        w.u32(self.bit_count);
        w.u32(self.r_mask);
        w.u32(self.g_mask);
        w.u32(self.b_mask);
        w.u32(self.a_mask);
    }
}

/// Surface description shared by `SURF_CANCREATE`, `SURF_CREATE` and `SURF_GETINFO`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SurfaceDesc {
    pub flags: SurfDescFlags,
    pub height: u32,
    pub width: u32,
    pub pitch: u32,
    pub size_x: u32,
    pub size_y: u32,
    pub back_buffers: u32,
    pub dst_overlay_ck: ColorKeyDesc,
    pub dst_blt_ck: ColorKeyDesc,
    pub src_overlay_ck: ColorKeyDesc,
    pub src_blt_ck: ColorKeyDesc,
    pub pixel_format: PixelFormatDesc,
    pub surf_caps: SurfCaps,
    pub handle: u64,
    pub offset: u64,
}

impl SurfaceDesc {
    pub const SIZE_BYTES: usize = 116;

    const PITCH_OFFSET: usize = 12;
    const HANDLE_OFFSET: usize = 100;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        Some(Self::read(&mut LeReader::new(buf)))
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        self.write(&mut LeWriter::new(&mut out));
        out
    }

    fn read(r: &mut LeReader<'_>) -> Self {
        let flags = SurfDescFlags::from_bits_retain(r.u32());
        let height = r.u32();
        let width = r.u32();
        let pitch = r.u32();
        let size_x = r.u32();
        let size_y = r.u32();
        let back_buffers = r.u32();
        r.skip(4);
        let dst_overlay_ck = ColorKeyDesc::read(r);
        let dst_blt_ck = ColorKeyDesc::read(r);
        let src_overlay_ck = ColorKeyDesc::read(r);
        let src_blt_ck = ColorKeyDesc::read(r);
        let pixel_format = PixelFormatDesc::read(r);
        let surf_caps = SurfCaps::from_bits_retain(r.u32());
        r.skip(4);
        let handle = r.u64();
        let offset = r.u64();
        Self {
            flags,
            height,
            width,
            pitch,
            size_x,
            size_y,
            back_buffers,
            dst_overlay_ck,
            dst_blt_ck,
            src_overlay_ck,
            src_blt_ck,
            pixel_format,
            surf_caps,
            handle,
            offset,
        }
    }

    fn write(&self, w: &mut LeWriter<'_>) {
        w.u32(self.flags.bits());
        w.u32(self.height);
        w.u32(self.width);
        w.u32(self.pitch);
        w.u32(self.size_x);
        w.u32(self.size_y);
        w.u32(self.back_buffers);
        w.u32(0);
        self.dst_overlay_ck.write(w);
        self.dst_blt_ck.write(w);
        self.src_overlay_ck.write(w);
        self.src_blt_ck.write(w);
        self.pixel_format.write(w);
        w.u32(self.surf_caps.bits());
        w.u32(0);
        w.u64(self.handle);
        w.u64(self.offset);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VhwaVersion {
    pub maj: u32,
    pub min: u32,
    pub bld: u32,
    pub reserved: u32,
}

impl VhwaVersion {
    pub const CURRENT: Self = Self {
        maj: crate::vhwa_flags::VHWA_VERSION_MAJ,
        min: crate::vhwa_flags::VHWA_VERSION_MIN,
        bld: crate::vhwa_flags::VHWA_VERSION_BLD,
        reserved: crate::vhwa_flags::VHWA_VERSION_RSV,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfCanCreate {
    pub desc: SurfaceDesc,
    pub is_different_pf: bool,
}

impl SurfCanCreate {
    pub const SIZE_BYTES: usize = 124;
    const ERR_INFO_OFFSET: usize = SurfaceDesc::SIZE_BYTES;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::new(buf);
        let desc = SurfaceDesc::read(&mut r);
        Some(Self {
            desc,
            is_different_pf: r.u32() != 0,
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        let mut w = LeWriter::new(&mut out);
        self.desc.write(&mut w);
        w.u32(u32::from(self.is_different_pf));
        w.u32(0);
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfDestroy {
    pub handle: u64,
}

impl SurfDestroy {
    pub const SIZE_BYTES: usize = 8;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        Some(Self {
            handle: LeReader::new(buf).u64(),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        self.handle.to_le_bytes()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfLock {
    pub handle: u64,
    pub offset: u64,
    pub flags: u32,
    /// Sub-rectangle the guest is about to write; `None` locks the whole surface.
    pub rect: Option<RectL>,
}

impl SurfLock {
    pub const SIZE_BYTES: usize = 40;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::new(buf);
        let handle = r.u64();
        let offset = r.u64();
        let flags = r.u32();
        let rect_valid = r.u32() != 0;
        let rect = RectL::read(&mut r);
        Some(Self {
            handle,
            offset,
            flags,
            rect: rect_valid.then_some(rect),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        let mut w = LeWriter::new(&mut out);
        w.u64(self.handle);
        w.u64(self.offset);
        w.u32(self.flags);
        w.u32(u32::from(self.rect.is_some()));
        self.rect.unwrap_or_default().write(&mut w);
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfUnlock {
    pub handle: u64,
    pub offset: u64,
    pub updated_mem: Option<RectL>,
}

impl SurfUnlock {
    pub const SIZE_BYTES: usize = 40;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::new(buf);
        let handle = r.u64();
        let offset = r.u64();
        let valid = r.u32() != 0;
        r.skip(4);
        let rect = RectL::read(&mut r);
        Some(Self {
            handle,
            offset,
            updated_mem: valid.then_some(rect),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        let mut w = LeWriter::new(&mut out);
        w.u64(self.handle);
        w.u64(self.offset);
        w.u32(u32::from(self.updated_mem.is_some()));
        w.u32(0);
        self.updated_mem.unwrap_or_default().write(&mut w);
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfBlt {
    pub dst_handle: u64,
    pub dst_offset: u64,
    pub dst_rect: RectL,
    pub src_handle: u64,
    pub src_offset: u64,
    pub src_rect: RectL,
    pub flags: u32,
    pub updated_src_mem: Option<RectL>,
}

impl SurfBlt {
    pub const SIZE_BYTES: usize = 88;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::new(buf);
        let dst_handle = r.u64();
        let dst_offset = r.u64();
        let dst_rect = RectL::read(&mut r);
        let src_handle = r.u64();
        let src_offset = r.u64();
        let src_rect = RectL::read(&mut r);
        let flags = r.u32();
        let valid = r.u32() != 0;
        let updated = RectL::read(&mut r);
        Some(Self {
            dst_handle,
            dst_offset,
            dst_rect,
            src_handle,
            src_offset,
            src_rect,
            flags,
            updated_src_mem: valid.then_some(updated),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        let mut w = LeWriter::new(&mut out);
        w.u64(self.dst_handle);
        w.u64(self.dst_offset);
        self.dst_rect.write(&mut w);
        w.u64(self.src_handle);
        w.u64(self.src_offset);
        self.src_rect.write(&mut w);
        w.u32(self.flags);
        w.u32(u32::from(self.updated_src_mem.is_some()));
        self.updated_src_mem.unwrap_or_default().write(&mut w);
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfColorFill {
    pub handle: u64,
    pub offset: u64,
    pub rect_count: u32,
    pub first_rect: RectL,
}

impl SurfColorFill {
    pub const SIZE_BYTES: usize = 40;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::new(buf);
        let handle = r.u64();
        let offset = r.u64();
        r.skip(4);
        let rect_count = r.u32();
        let first_rect = RectL::read(&mut r);
        Some(Self {
            handle,
            offset,
            rect_count,
            first_rect,
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        let mut w = LeWriter::new(&mut out);
        w.u64(self.handle);
        w.u64(self.offset);
        w.u32(0);
        w.u32(self.rect_count);
        self.first_rect.write(&mut w);
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfFlip {
    pub targ_handle: u64,
    pub targ_offset: u64,
    pub curr_handle: u64,
    pub curr_offset: u64,
    pub flags: u32,
    pub updated_targ_mem: Option<RectL>,
    pub updated_curr_mem: Option<RectL>,
}

impl SurfFlip {
    pub const SIZE_BYTES: usize = 80;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::new(buf);
        let targ_handle = r.u64();
        let targ_offset = r.u64();
        let curr_handle = r.u64();
        let curr_offset = r.u64();
        let flags = r.u32();
        let targ_valid = r.u32() != 0;
        let targ_rect = RectL::read(&mut r);
        let curr_valid = r.u32() != 0;
        r.skip(4);
        let curr_rect = RectL::read(&mut r);
        Some(Self {
            targ_handle,
            targ_offset,
            curr_handle,
            curr_offset,
            flags,
            updated_targ_mem: targ_valid.then_some(targ_rect),
            updated_curr_mem: curr_valid.then_some(curr_rect),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        let mut w = LeWriter::new(&mut out);
        w.u64(self.targ_handle);
        w.u64(self.targ_offset);
        w.u64(self.curr_handle);
        w.u64(self.curr_offset);
        w.u32(self.flags);
        w.u32(u32::from(self.updated_targ_mem.is_some()));
        self.updated_targ_mem.unwrap_or_default().write(&mut w);
        w.u32(u32::from(self.updated_curr_mem.is_some()));
        w.u32(0);
        self.updated_curr_mem.unwrap_or_default().write(&mut w);
        out
    }
}

/// Overlay effects block: only the two color keys are consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlayFx {
    pub flags: u32,
    pub fx_flags: u32,
    pub dst_ck: ColorKeyDesc,
    pub src_ck: ColorKeyDesc,
}

impl OverlayFx {
    pub const SIZE_BYTES: usize = 32;

    fn read(r: &mut LeReader<'_>) -> Self {
        let flags = r.u32();
        r.skip(4);
        let fx_flags = r.u32();
        r.skip(4);
        Self {
            flags,
            fx_flags,
            dst_ck: ColorKeyDesc::read(r),
            src_ck: ColorKeyDesc::read(r),
        }
    }

    fn write(&self, w: &mut LeWriter<'_>) {
        w.u32(self.flags);
        w.u32(0);
        w.u32(self.fx_flags);
        w.u32(0);
        self.dst_ck.write(w);
        self.src_ck.write(w);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfOverlayUpdate {
    /// Primary the overlay is shown on; 0 keeps the current association.
    pub dst_handle: u64,
    pub dst_offset: u64,
    pub dst_rect: RectL,
    pub src_handle: u64,
    pub src_offset: u64,
    pub src_rect: RectL,
    pub flags: OverlayFlags,
    pub updated_src_mem: Option<RectL>,
    pub fx: OverlayFx,
}

impl SurfOverlayUpdate {
    pub const SIZE_BYTES: usize = 120;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::new(buf);
        let dst_handle = r.u64();
        let dst_offset = r.u64();
        let dst_rect = RectL::read(&mut r);
        let src_handle = r.u64();
        let src_offset = r.u64();
        let src_rect = RectL::read(&mut r);
        let flags = OverlayFlags::from_bits_retain(r.u32());
        let valid = r.u32() != 0;
        let fx = OverlayFx::read(&mut r);
        let updated = RectL::read(&mut r);
        Some(Self {
            dst_handle,
            dst_offset,
            dst_rect,
            src_handle,
            src_offset,
            src_rect,
            flags,
            updated_src_mem: valid.then_some(updated),
            fx,
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        let mut w = LeWriter::new(&mut out);
        w.u64(self.dst_handle);
        w.u64(self.dst_offset);
        self.dst_rect.write(&mut w);
        w.u64(self.src_handle);
        w.u64(self.src_offset);
        self.src_rect.write(&mut w);
        w.u32(self.flags.bits());
        w.u32(u32::from(self.updated_src_mem.is_some()));
        self.fx.write(&mut w);
        self.updated_src_mem.unwrap_or_default().write(&mut w);
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfOverlaySetPosition {
    pub dst_handle: u64,
    pub dst_offset: u64,
    pub src_handle: u64,
    pub src_offset: u64,
    pub x: u32,
    pub y: u32,
    pub flags: u32,
}

impl SurfOverlaySetPosition {
    pub const SIZE_BYTES: usize = 48;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::new(buf);
        Some(Self {
            dst_handle: r.u64(),
            dst_offset: r.u64(),
            src_handle: r.u64(),
            src_offset: r.u64(),
            x: r.u32(),
            y: r.u32(),
            flags: r.u32(),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        let mut w = LeWriter::new(&mut out);
        w.u64(self.dst_handle);
        w.u64(self.dst_offset);
        w.u64(self.src_handle);
        w.u64(self.src_offset);
        w.u32(self.x);
        w.u32(self.y);
        w.u32(self.flags);
        w.u32(0);
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfColorkeySet {
    pub handle: u64,
    pub offset: u64,
    pub key: ColorKeyDesc,
    pub flags: ColorKeyFlags,
}

impl SurfColorkeySet {
    pub const SIZE_BYTES: usize = 32;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::new(buf);
        Some(Self {
            handle: r.u64(),
            offset: r.u64(),
            key: ColorKeyDesc::read(&mut r),
            flags: ColorKeyFlags::from_bits_retain(r.u32()),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        let mut w = LeWriter::new(&mut out);
        w.u64(self.handle);
        w.u64(self.offset);
        self.key.write(&mut w);
        w.u32(self.flags.bits());
        w.u32(0);
        out
    }
}

/// `QUERY_INFO1` input: the guest's compiled-in protocol version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryInfo1 {
    pub guest_version: VhwaVersion,
}

impl QueryInfo1 {
    /// Input and output share storage; the output block is the larger of the two.
    pub const SIZE_BYTES: usize = 40;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::new(buf);
        Some(Self {
            guest_version: VhwaVersion {
                maj: r.u32(),
                min: r.u32(),
                bld: r.u32(),
                reserved: r.u32(),
            },
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        let mut w = LeWriter::new(&mut out);
        w.u32(self.guest_version.maj);
        w.u32(self.guest_version.min);
        w.u32(self.guest_version.bld);
        w.u32(self.guest_version.reserved);
        out
    }
}

/// `QUERY_INFO1` output block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryInfo1Out {
    pub cfg_flags: u32,
    pub caps: Caps,
    pub caps2: Caps2,
    pub color_key_caps: ColorKeyCaps,
    pub stretch_caps: u32,
    pub surface_caps: SurfCaps,
    pub num_overlays: u32,
    pub cur_overlays: u32,
    pub num_fourcc: u32,
}

impl QueryInfo1Out {
    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < QueryInfo1::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::new(buf);
        Some(Self {
            cfg_flags: r.u32(),
            caps: Caps::from_bits_retain(r.u32()),
            caps2: Caps2::from_bits_retain(r.u32()),
            color_key_caps: ColorKeyCaps::from_bits_retain(r.u32()),
            stretch_caps: r.u32(),
            surface_caps: SurfCaps::from_bits_retain(r.u32()),
            num_overlays: r.u32(),
            cur_overlays: r.u32(),
            num_fourcc: r.u32(),
        })
    }

    fn write(&self, w: &mut LeWriter<'_>) {
        w.u32(self.cfg_flags);
        w.u32(self.caps.bits());
        w.u32(self.caps2.bits());
        w.u32(self.color_key_caps.bits());
        w.u32(self.stretch_caps);
        w.u32(self.surface_caps.bits());
        w.u32(self.num_overlays);
        w.u32(self.cur_overlays);
        w.u32(self.num_fourcc);
        w.u32(0);
    }
}

/// `QUERY_INFO2`: `num_fourcc` is the capacity of the guest's trailing FOURCC array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryInfo2 {
    pub num_fourcc: u32,
}

impl QueryInfo2 {
    pub const HEADER_BYTES: usize = 4;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::HEADER_BYTES {
            return None;
        }
        Some(Self {
            num_fourcc: LeReader::new(buf).u32(),
        })
    }

    /// Body size for a guest array of `num_fourcc` entries.
    pub fn size_bytes(num_fourcc: u32) -> usize {
        Self::HEADER_BYTES + 4 * num_fourcc as usize
    }

    pub fn encode_to_le_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::size_bytes(self.num_fourcc)];
        LeWriter::new(&mut out).u32(self.num_fourcc);
        out
    }
}

/// `HH_CONSTRUCT`: the VRAM itself is handed over out of band; only its size travels here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HhConstruct {
    pub vram_size: u32,
}

impl HhConstruct {
    pub const SIZE_BYTES: usize = 24;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        let mut r = LeReader::at(buf, 16);
        Some(Self {
            vram_size: r.u32(),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        LeWriter::at(&mut out, 16).u32(self.vram_size);
        out
    }
}

/// One decoded VHWA command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VhwaCommand {
    SurfCanCreate(SurfCanCreate),
    SurfCreate(SurfaceDesc),
    SurfDestroy(SurfDestroy),
    SurfLock(SurfLock),
    SurfUnlock(SurfUnlock),
    SurfBlt(SurfBlt),
    SurfFlip(SurfFlip),
    SurfOverlayUpdate(SurfOverlayUpdate),
    SurfOverlaySetPosition(SurfOverlaySetPosition),
    SurfColorkeySet(SurfColorkeySet),
    QueryInfo1(QueryInfo1),
    QueryInfo2(QueryInfo2),
    Enable,
    Disable,
    HhConstruct(HhConstruct),
    HhReset,
    SurfGetInfo(SurfaceDesc),
    SurfColorFill(SurfColorFill),
    HhDisable,
    HhEnable,
    HhSaveStateSaveBegin,
    HhSaveStateSaveEnd,
    HhSaveStateSavePerform,
    HhSaveStateLoadPerform,
}

impl VhwaCommand {
    /// Decodes `body` as a command of wire type `cmd_type`.
    ///
    /// Unknown types are [`VhwaError::NotImplemented`]; a body shorter than its layout is
    /// [`VhwaError::InvalidParameter`].
    pub fn decode(cmd_type: u32, body: &[u8]) -> VhwaResult<Self> {
        let ty = VhwaCmdType::from_u32(cmd_type).ok_or(VhwaError::NotImplemented)?;
        let cmd = match ty {
            VhwaCmdType::SurfCanCreate => {
                SurfCanCreate::decode_from_le_bytes(body).map(Self::SurfCanCreate)
            }
            VhwaCmdType::SurfCreate => SurfaceDesc::decode_from_le_bytes(body).map(Self::SurfCreate),
            VhwaCmdType::SurfDestroy => SurfDestroy::decode_from_le_bytes(body).map(Self::SurfDestroy),
            VhwaCmdType::SurfLock => SurfLock::decode_from_le_bytes(body).map(Self::SurfLock),
            VhwaCmdType::SurfUnlock => SurfUnlock::decode_from_le_bytes(body).map(Self::SurfUnlock),
            VhwaCmdType::SurfBlt => SurfBlt::decode_from_le_bytes(body).map(Self::SurfBlt),
            VhwaCmdType::SurfFlip => SurfFlip::decode_from_le_bytes(body).map(Self::SurfFlip),
            VhwaCmdType::SurfOverlayUpdate => {
                SurfOverlayUpdate::decode_from_le_bytes(body).map(Self::SurfOverlayUpdate)
            }
            VhwaCmdType::SurfOverlaySetPosition => {
                SurfOverlaySetPosition::decode_from_le_bytes(body).map(Self::SurfOverlaySetPosition)
            }
            VhwaCmdType::SurfColorkeySet => {
                SurfColorkeySet::decode_from_le_bytes(body).map(Self::SurfColorkeySet)
            }
            VhwaCmdType::QueryInfo1 => QueryInfo1::decode_from_le_bytes(body).map(Self::QueryInfo1),
            VhwaCmdType::QueryInfo2 => QueryInfo2::decode_from_le_bytes(body).map(Self::QueryInfo2),
            VhwaCmdType::Enable => Some(Self::Enable),
            VhwaCmdType::Disable => Some(Self::Disable),
            VhwaCmdType::HhConstruct => {
                HhConstruct::decode_from_le_bytes(body).map(Self::HhConstruct)
            }
            VhwaCmdType::HhReset => Some(Self::HhReset),
            VhwaCmdType::SurfGetInfo => {
                SurfaceDesc::decode_from_le_bytes(body).map(Self::SurfGetInfo)
            }
            VhwaCmdType::SurfColorFill => {
                SurfColorFill::decode_from_le_bytes(body).map(Self::SurfColorFill)
            }
            VhwaCmdType::HhDisable => Some(Self::HhDisable),
            VhwaCmdType::HhEnable => Some(Self::HhEnable),
            VhwaCmdType::HhSaveStateSaveBegin => Some(Self::HhSaveStateSaveBegin),
            VhwaCmdType::HhSaveStateSaveEnd => Some(Self::HhSaveStateSaveEnd),
            VhwaCmdType::HhSaveStateSavePerform => Some(Self::HhSaveStateSavePerform),
            VhwaCmdType::HhSaveStateLoadPerform => Some(Self::HhSaveStateLoadPerform),
        };
        cmd.ok_or(VhwaError::InvalidParameter)
    }

    pub fn cmd_type(&self) -> VhwaCmdType {
        match self {
            Self::SurfCanCreate(_) => VhwaCmdType::SurfCanCreate,
            Self::SurfCreate(_) => VhwaCmdType::SurfCreate,
            Self::SurfDestroy(_) => VhwaCmdType::SurfDestroy,
            Self::SurfLock(_) => VhwaCmdType::SurfLock,
            Self::SurfUnlock(_) => VhwaCmdType::SurfUnlock,
            Self::SurfBlt(_) => VhwaCmdType::SurfBlt,
            Self::SurfFlip(_) => VhwaCmdType::SurfFlip,
            Self::SurfOverlayUpdate(_) => VhwaCmdType::SurfOverlayUpdate,
            Self::SurfOverlaySetPosition(_) => VhwaCmdType::SurfOverlaySetPosition,
            Self::SurfColorkeySet(_) => VhwaCmdType::SurfColorkeySet,
            Self::QueryInfo1(_) => VhwaCmdType::QueryInfo1,
            Self::QueryInfo2(_) => VhwaCmdType::QueryInfo2,
            Self::Enable => VhwaCmdType::Enable,
            Self::Disable => VhwaCmdType::Disable,
            Self::HhConstruct(_) => VhwaCmdType::HhConstruct,
            Self::HhReset => VhwaCmdType::HhReset,
            Self::SurfGetInfo(_) => VhwaCmdType::SurfGetInfo,
            Self::SurfColorFill(_) => VhwaCmdType::SurfColorFill,
            Self::HhDisable => VhwaCmdType::HhDisable,
            Self::HhEnable => VhwaCmdType::HhEnable,
            Self::HhSaveStateSaveBegin => VhwaCmdType::HhSaveStateSaveBegin,
            Self::HhSaveStateSaveEnd => VhwaCmdType::HhSaveStateSaveEnd,
            Self::HhSaveStateSavePerform => VhwaCmdType::HhSaveStateSavePerform,
            Self::HhSaveStateLoadPerform => VhwaCmdType::HhSaveStateLoadPerform,
        }
    }

    /// Wire body for this command; bodiless commands encode to an empty vector.
    pub fn encode_body(&self) -> Vec<u8> {
        match self {
            Self::SurfCanCreate(c) => c.encode_to_le_bytes().to_vec(),
            Self::SurfCreate(d) | Self::SurfGetInfo(d) => d.encode_to_le_bytes().to_vec(),
            Self::SurfDestroy(c) => c.encode_to_le_bytes().to_vec(),
            Self::SurfLock(c) => c.encode_to_le_bytes().to_vec(),
            Self::SurfUnlock(c) => c.encode_to_le_bytes().to_vec(),
            Self::SurfBlt(c) => c.encode_to_le_bytes().to_vec(),
            Self::SurfFlip(c) => c.encode_to_le_bytes().to_vec(),
            Self::SurfOverlayUpdate(c) => c.encode_to_le_bytes().to_vec(),
            Self::SurfOverlaySetPosition(c) => c.encode_to_le_bytes().to_vec(),
            Self::SurfColorkeySet(c) => c.encode_to_le_bytes().to_vec(),
            Self::QueryInfo1(c) => c.encode_to_le_bytes().to_vec(),
            Self::QueryInfo2(c) => c.encode_to_le_bytes(),
            Self::HhConstruct(c) => c.encode_to_le_bytes().to_vec(),
            Self::SurfColorFill(c) => c.encode_to_le_bytes().to_vec(),
            Self::Enable
            | Self::Disable
            | Self::HhReset
            | Self::HhDisable
            | Self::HhEnable
            | Self::HhSaveStateSaveBegin
            | Self::HhSaveStateSaveEnd
            | Self::HhSaveStateSavePerform
            | Self::HhSaveStateLoadPerform => Vec::new(),
        }
    }
}

/// Outputs of a successfully executed command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum VhwaReply {
    #[default]
    None,
    CanCreate {
        err_info: i32,
    },
    /// `SURF_CREATE`/`SURF_GETINFO` layout report. `handle` is set when the host assigned it.
    SurfaceInfo {
        pitch: u32,
        size_x: u32,
        size_y: u32,
        handle: Option<u64>,
    },
    QueryInfo1(QueryInfo1Out),
    QueryInfo2 {
        fourccs: Vec<u32>,
    },
}

impl VhwaReply {
    /// Patches the output fields into a command body in place.
    pub fn write_to_body(&self, body: &mut [u8]) -> VhwaResult<()> {
        match self {
            Self::None => {}
            Self::CanCreate { err_info } => {
                if body.len() < SurfCanCreate::SIZE_BYTES {
                    return Err(VhwaError::InvalidParameter);
                }
                LeWriter::at(body, SurfCanCreate::ERR_INFO_OFFSET).i32(*err_info);
            }
            Self::SurfaceInfo {
                pitch,
                size_x,
                size_y,
                handle,
            } => {
                if body.len() < SurfaceDesc::SIZE_BYTES {
                    return Err(VhwaError::InvalidParameter);
                }
                let mut w = LeWriter::at(body, SurfaceDesc::PITCH_OFFSET);
                w.u32(*pitch);
                w.u32(*size_x);
                w.u32(*size_y);
                if let Some(handle) = handle {
                    LeWriter::at(body, SurfaceDesc::HANDLE_OFFSET).u64(*handle);
                }
            }
            Self::QueryInfo1(out) => {
                if body.len() < QueryInfo1::SIZE_BYTES {
                    return Err(VhwaError::InvalidParameter);
                }
                out.write(&mut LeWriter::new(body));
            }
            Self::QueryInfo2 { fourccs } => {
                let count = u32::try_from(fourccs.len()).map_err(|_| VhwaError::InvalidParameter)?;
                if body.len() < QueryInfo2::size_bytes(count) {
                    return Err(VhwaError::InvalidParameter);
                }
                let mut w = LeWriter::new(body);
                w.u32(count);
                for &fourcc in fourccs {
                    w.u32(fourcc);
                }
            }
        }
        Ok(())
    }
}
