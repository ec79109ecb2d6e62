mod common;

use common::{image_with_vram, overlay_desc, primary_desc};
use proptest::prelude::*;
use vhwa_overlay::{RecordingGl, VhwaImage};
use vhwa_protocol::fourcc::FOURCC_UYVY;
use vhwa_protocol::vhwa_cmd::SurfDestroy;
use vhwa_protocol::vhwa_flags::VHWA_OFFSET64_VOID;
use vhwa_protocol::{VhwaCommand, VhwaReply};

#[derive(Clone, Debug)]
enum Op {
    CreatePrimary,
    CreateOverlay(u32),
    Destroy(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::CreatePrimary),
        (0u32..3).prop_map(Op::CreateOverlay),
        any::<usize>().prop_map(Op::Destroy),
    ]
}

fn assert_vga_invariants(image: &VhwaImage<RecordingGl>) -> Result<(), TestCaseError> {
    let display = image.display();
    let vga = display.vga();
    prop_assert!(vga.is_some(), "VGA surface lost");
    prop_assert!(!display.primaries().is_empty());
    prop_assert_eq!(display.list_of(vga.unwrap()), Some(display.primary_list()));
    prop_assert!(display.primary().is_some());
    for &list in display.overlays() {
        prop_assert!(display.list(list).is_some_and(|l| !l.is_empty()));
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn primary_list_never_loses_the_vga(ops in proptest::collection::vec(op(), 1..40)) {
        let (mut image, _vram) = image_with_vram();
        let mut handles: Vec<u64> = Vec::new();

        for op in ops {
            let cmd = match op {
                Op::CreatePrimary => VhwaCommand::SurfCreate(primary_desc()),
                Op::CreateOverlay(back_buffers) => VhwaCommand::SurfCreate(overlay_desc(
                    FOURCC_UYVY,
                    64,
                    48,
                    back_buffers,
                    VHWA_OFFSET64_VOID,
                )),
                Op::Destroy(i) if !handles.is_empty() => {
                    let handle = handles.remove(i % handles.len());
                    VhwaCommand::SurfDestroy(SurfDestroy { handle })
                }
                Op::Destroy(_) => continue,
            };
            if let Ok(VhwaReply::SurfaceInfo { handle: Some(h), .. }) = image.execute(&cmd) {
                handles.push(h);
            }
            assert_vga_invariants(&image)?;
        }

        for handle in handles {
            image
                .execute(&VhwaCommand::SurfDestroy(SurfDestroy { handle }))
                .unwrap();
            assert_vga_invariants(&image)?;
        }
        prop_assert!(!image.has_surfaces());
    }
}
