use pretty_assertions::assert_eq;
use vhwa_protocol::status::VERR_INVALID_STATE;
use vhwa_protocol::vhwa_cmd::{
    ColorKeyDesc, HhConstruct, QueryInfo1, QueryInfo1Out, SurfCanCreate, SurfColorFill,
    SurfColorkeySet, SurfDestroy, SurfFlip, SurfLock, SurfOverlaySetPosition, SurfOverlayUpdate,
    SurfUnlock, SurfaceDesc, VhwaCmdHdr, VhwaVersion, VHWACMD_FLAG_HH_CMD,
};
use vhwa_protocol::vhwa_flags::{Caps, ColorKeyFlags, SurfCaps};
use vhwa_protocol::{VhwaCmdType, VhwaCommand, VhwaReply};

#[test]
fn body_sizes_are_stable() {
    assert_eq!(VhwaCmdHdr::SIZE_BYTES, 32);
    assert_eq!(SurfaceDesc::SIZE_BYTES, 116);
    assert_eq!(SurfCanCreate::SIZE_BYTES, 124);
    assert_eq!(SurfDestroy::SIZE_BYTES, 8);
    assert_eq!(SurfLock::SIZE_BYTES, 40);
    assert_eq!(SurfUnlock::SIZE_BYTES, 40);
    assert_eq!(SurfColorFill::SIZE_BYTES, 40);
    assert_eq!(SurfFlip::SIZE_BYTES, 80);
    assert_eq!(SurfOverlayUpdate::SIZE_BYTES, 120);
    assert_eq!(SurfOverlaySetPosition::SIZE_BYTES, 48);
    assert_eq!(SurfColorkeySet::SIZE_BYTES, 32);
    assert_eq!(QueryInfo1::SIZE_BYTES, 40);
    assert_eq!(HhConstruct::SIZE_BYTES, 24);
}

#[test]
fn header_rc_lives_at_offset_four() {
    let hdr = VhwaCmdHdr {
        cmd_type: VhwaCmdType::SurfFlip as u32,
        rc: VERR_INVALID_STATE,
        flags: VHWACMD_FLAG_HH_CMD,
        ..Default::default()
    };
    let bytes = hdr.encode_to_le_bytes();
    let rc = &bytes[VhwaCmdHdr::RC_OFFSET..VhwaCmdHdr::RC_OFFSET + 4];
    assert_eq!(rc, &VERR_INVALID_STATE.to_le_bytes());

    let decoded = VhwaCmdHdr::decode_from_le_bytes(&bytes).unwrap();
    assert!(decoded.is_host_cmd());
    assert_eq!(decoded, hdr);
}

#[test]
fn query_info1_output_overwrites_the_version() {
    let mut body = QueryInfo1 {
        guest_version: VhwaVersion::CURRENT,
    }
    .encode_to_le_bytes();
    let out = QueryInfo1Out {
        cfg_flags: 1,
        caps: Caps::OVERLAY | Caps::OVERLAYSTRETCH,
        surface_caps: SurfCaps::OVERLAY,
        num_overlays: 1,
        num_fourcc: 4,
        ..Default::default()
    };
    VhwaReply::QueryInfo1(out).write_to_body(&mut body).unwrap();
    assert_eq!(QueryInfo1Out::decode_from_le_bytes(&body), Some(out));
}

#[test]
fn colorkey_set_round_trips_through_the_command_decoder() {
    let cmd = SurfColorkeySet {
        handle: 3,
        offset: 0x1000,
        key: ColorKeyDesc {
            low: 0x00ff_00ff,
            high: 0x00ff_00ff,
        },
        flags: ColorKeyFlags::DESTOVERLAY,
    };
    let decoded = VhwaCommand::decode(
        VhwaCmdType::SurfColorkeySet as u32,
        &VhwaCommand::SurfColorkeySet(cmd).encode_body(),
    )
    .unwrap();
    assert_eq!(decoded, VhwaCommand::SurfColorkeySet(cmd));
    assert_eq!(decoded.cmd_type(), VhwaCmdType::SurfColorkeySet);
}

#[test]
fn can_create_err_info_follows_the_description() {
    let mut body = SurfCanCreate {
        desc: SurfaceDesc::default(),
        is_different_pf: true,
    }
    .encode_to_le_bytes();
    VhwaReply::CanCreate { err_info: -1 }
        .write_to_body(&mut body)
        .unwrap();
    assert_eq!(&body[116..120], &(-1i32).to_le_bytes());
}
