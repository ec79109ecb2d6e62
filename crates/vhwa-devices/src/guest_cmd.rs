//! Access to commands the guest placed in VRAM.
//!
//! A guest command is a [`VhwaCmdHdr`] at some VRAM offset followed by its body. The host reads
//! it once, decodes it into a [`VhwaCommand`], and later patches `rc` plus any reply fields back
//! into the same bytes.

use vhwa_overlay::{Vram, VramError};
use vhwa_protocol::status::rc_of;
use vhwa_protocol::vhwa_cmd::{
    HhConstruct, QueryInfo1, QueryInfo2, SurfBlt, SurfCanCreate, SurfColorFill, SurfColorkeySet,
    SurfDestroy, SurfFlip, SurfLock, SurfOverlaySetPosition, SurfOverlayUpdate, SurfUnlock,
    SurfaceDesc,
};
use vhwa_protocol::{VhwaCmdHdr, VhwaCmdType, VhwaCommand, VhwaError, VhwaReply, VhwaResult};

const HDR_LEN: u64 = VhwaCmdHdr::SIZE_BYTES as u64;

fn fixed_body_size(ty: VhwaCmdType) -> usize {
    match ty {
        VhwaCmdType::SurfCanCreate => SurfCanCreate::SIZE_BYTES,
        VhwaCmdType::SurfCreate | VhwaCmdType::SurfGetInfo => SurfaceDesc::SIZE_BYTES,
        VhwaCmdType::SurfDestroy => SurfDestroy::SIZE_BYTES,
        VhwaCmdType::SurfLock => SurfLock::SIZE_BYTES,
        VhwaCmdType::SurfUnlock => SurfUnlock::SIZE_BYTES,
        VhwaCmdType::SurfBlt => SurfBlt::SIZE_BYTES,
        VhwaCmdType::SurfFlip => SurfFlip::SIZE_BYTES,
        VhwaCmdType::SurfOverlayUpdate => SurfOverlayUpdate::SIZE_BYTES,
        VhwaCmdType::SurfOverlaySetPosition => SurfOverlaySetPosition::SIZE_BYTES,
        VhwaCmdType::SurfColorkeySet => SurfColorkeySet::SIZE_BYTES,
        VhwaCmdType::QueryInfo1 => QueryInfo1::SIZE_BYTES,
        VhwaCmdType::QueryInfo2 => QueryInfo2::HEADER_BYTES,
        VhwaCmdType::HhConstruct => HhConstruct::SIZE_BYTES,
        VhwaCmdType::SurfColorFill => SurfColorFill::SIZE_BYTES,
        VhwaCmdType::Enable
        | VhwaCmdType::Disable
        | VhwaCmdType::HhReset
        | VhwaCmdType::HhDisable
        | VhwaCmdType::HhEnable
        | VhwaCmdType::HhSaveStateSaveBegin
        | VhwaCmdType::HhSaveStateSaveEnd
        | VhwaCmdType::HhSaveStateSavePerform
        | VhwaCmdType::HhSaveStateLoadPerform => 0,
    }
}

/// Bytes the body of a command at `offset` occupies. `QUERY_INFO2` is sized by its own header.
fn body_size(vram: &dyn Vram, offset: u64, ty: VhwaCmdType) -> VhwaResult<usize> {
    let fixed = fixed_body_size(ty);
    if ty != VhwaCmdType::QueryInfo2 {
        return Ok(fixed);
    }
    let mut header = [0u8; QueryInfo2::HEADER_BYTES];
    vram.read(offset.saturating_add(HDR_LEN), &mut header)
        .map_err(|_| VhwaError::InvalidParameter)?;
    let q = QueryInfo2::decode_from_le_bytes(&header).ok_or(VhwaError::InvalidParameter)?;
    Ok(QueryInfo2::size_bytes(q.num_fourcc))
}

fn read_header(vram: &dyn Vram, offset: u64) -> VhwaResult<VhwaCmdHdr> {
    let mut bytes = [0u8; VhwaCmdHdr::SIZE_BYTES];
    vram.read(offset, &mut bytes)
        .map_err(|_| VhwaError::InvalidParameter)?;
    VhwaCmdHdr::decode_from_le_bytes(&bytes).ok_or(VhwaError::InvalidParameter)
}

/// Reads and decodes the command whose header sits at `offset`.
pub fn read_guest_command(vram: &dyn Vram, offset: u64) -> VhwaResult<(VhwaCmdHdr, VhwaCommand)> {
    let hdr = read_header(vram, offset)?;
    let ty = VhwaCmdType::from_u32(hdr.cmd_type).ok_or(VhwaError::NotImplemented)?;
    let len = body_size(vram, offset, ty)?;
    let body_offset = offset
        .checked_add(HDR_LEN)
        .ok_or(VhwaError::InvalidParameter)?;
    if !vram.contains(body_offset, len) {
        return Err(VhwaError::InvalidParameter);
    }
    let mut body = vec![0u8; len];
    vram.read(body_offset, &mut body)
        .map_err(|_| VhwaError::InvalidParameter)?;
    let cmd = VhwaCommand::decode(hdr.cmd_type, &body)?;
    Ok((hdr, cmd))
}

/// Patches `rc` and the reply fields of the command at `offset`.
pub fn write_guest_result(
    vram: &dyn Vram,
    offset: u64,
    result: &VhwaResult<VhwaReply>,
) -> Result<(), VramError> {
    if let Ok(reply) = result {
        if *reply != VhwaReply::None {
            write_reply(vram, offset, reply)?;
        }
    }
    let rc_offset = offset.saturating_add(VhwaCmdHdr::RC_OFFSET as u64);
    vram.write(rc_offset, &rc_of(result).to_le_bytes())
}

fn write_reply(vram: &dyn Vram, offset: u64, reply: &VhwaReply) -> Result<(), VramError> {
    let hdr = read_header(vram, offset).map_err(|_| VramError::OutOfBounds {
        offset,
        len: VhwaCmdHdr::SIZE_BYTES,
    })?;
    let Some(ty) = VhwaCmdType::from_u32(hdr.cmd_type) else {
        return Ok(());
    };
    let body_offset = offset.saturating_add(HDR_LEN);
    let len = body_size(vram, offset, ty).unwrap_or(0);
    let mut body = vec![0u8; len];
    vram.read(body_offset, &mut body)?;
    if let Err(err) = reply.write_to_body(&mut body) {
        tracing::warn!(%err, cmd = ?ty, "reply does not fit the guest body");
        return Ok(());
    }
    vram.write(body_offset, &body)
}

/// Lays out `cmd` at `offset` the way a guest driver would. Used to stage commands in tests and
/// by hosts that build guest-visible commands themselves.
pub fn write_guest_command(
    vram: &dyn Vram,
    offset: u64,
    cmd: &VhwaCommand,
    flags: u32,
) -> Result<(), VramError> {
    let hdr = VhwaCmdHdr {
        cmd_type: cmd.cmd_type() as u32,
        flags,
        ..Default::default()
    };
    vram.write(offset, &hdr.encode_to_le_bytes())?;
    vram.write(offset.saturating_add(HDR_LEN), &cmd.encode_body())
}

/// Status the host last wrote into the command at `offset`.
pub fn read_guest_rc(vram: &dyn Vram, offset: u64) -> Result<i32, VramError> {
    let mut rc = [0u8; 4];
    vram.read(offset.saturating_add(VhwaCmdHdr::RC_OFFSET as u64), &mut rc)?;
    Ok(i32::from_le_bytes(rc))
}
