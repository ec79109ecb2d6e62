use pretty_assertions::assert_eq;
use vhwa::protocol::fourcc::{FOURCC_UYVY, FOURCC_YV12};
use vhwa::protocol::vhwa_cmd::QueryInfo2;
use vhwa::{GlCaps, RecordingGl, VhwaCommand, VhwaImage, VhwaInfo, VhwaReply, VhwaSettings};

#[test]
fn json_settings_drive_the_reported_fourccs() {
    let json = format!(r#"{{"fourcc_enabled": [{FOURCC_YV12}, {FOURCC_UYVY}]}}"#);
    let settings: VhwaSettings = serde_json::from_str(&json).unwrap();
    assert!(!settings.stretch_linear);

    let mut image = VhwaImage::new(RecordingGl::new(), VhwaInfo::new(GlCaps::full()), settings);
    let reply = image
        .execute(&VhwaCommand::QueryInfo2(QueryInfo2 { num_fourcc: 2 }))
        .unwrap();
    assert_eq!(
        reply,
        VhwaReply::QueryInfo2 {
            fourccs: vec![FOURCC_YV12, FOURCC_UYVY],
        }
    );
}

#[test]
fn settings_round_trip_through_json() {
    let settings = VhwaSettings {
        stretch_linear: true,
        ..Default::default()
    };
    let json = serde_json::to_string(&settings).unwrap();
    let back: VhwaSettings = serde_json::from_str(&json).unwrap();
    assert_eq!(back, settings);
}
