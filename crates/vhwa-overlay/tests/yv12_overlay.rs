mod common;

use common::{create, image_with_vram, overlay_desc, primary_desc, show_overlay};
use pretty_assertions::assert_eq;
use vhwa_overlay::gl::GlEvent;
use vhwa_overlay::Rect;
use vhwa_protocol::fourcc::FOURCC_YV12;
use vhwa_protocol::vhwa_cmd::{RectL, SurfDestroy, SurfFlip, SurfLock, SurfUnlock};
use vhwa_protocol::{VhwaCommand, VhwaReply};

const FRONT_OFFSET: u64 = 0x40_0000;
const BACK_OFFSET: u64 = 0x48_0000;

fn drew(events: &[GlEvent]) -> bool {
    events
        .iter()
        .any(|e| matches!(e, GlEvent::CallDisplay(_) | GlEvent::Draw(_)))
}

fn uploaded(events: &[GlEvent]) -> bool {
    events.iter().any(|e| matches!(e, GlEvent::TexSubImage { .. }))
}

#[test]
fn yv12_overlay_from_create_to_destroy() {
    let (mut image, vram) = image_with_vram();
    let primary = create(&mut image, &primary_desc());

    let front_desc = overlay_desc(FOURCC_YV12, 320, 240, 1, FRONT_OFFSET);
    let info = image
        .execute(&VhwaCommand::SurfGetInfo(front_desc))
        .unwrap();
    assert_eq!(
        info,
        VhwaReply::SurfaceInfo {
            pitch: 320,
            size_x: 320 * 240 * 3 / 2,
            size_y: 1,
            handle: None,
        }
    );

    let front = create(&mut image, &front_desc);
    let back = create(&mut image, &overlay_desc(FOURCC_YV12, 320, 240, 1, BACK_OFFSET));
    assert_eq!(image.display().overlays().len(), 1);

    // Guest draws a frame: mid-grey luma, neutral chroma.
    let frame = vec![0x80u8; 320 * 240 * 3 / 2];
    vram.write(FRONT_OFFSET, &frame).unwrap();
    image
        .execute(&VhwaCommand::SurfLock(SurfLock {
            handle: front,
            offset: FRONT_OFFSET,
            flags: 0,
            rect: None,
        }))
        .unwrap();
    image
        .execute(&VhwaCommand::SurfUnlock(SurfUnlock {
            handle: front,
            offset: FRONT_OFFSET,
            updated_mem: Some(RectL::new(0, 0, 320, 240)),
        }))
        .unwrap();

    image
        .execute(&show_overlay(
            front,
            primary,
            RectL::new(100, 100, 420, 340),
            RectL::new(0, 0, 320, 240),
        ))
        .unwrap();
    image.update_viewport(Rect::from_size(640, 480));
    assert!(image.has_visible_overlays());
    assert!(image.display().display_primary());
    assert_eq!(image.overlays_rect_union(), Rect::new(100, 100, 320, 240));

    image.gl_mut().take_events();
    assert!(image.perform_display(false));
    let events = image.gl_mut().take_events();
    assert!(uploaded(&events));
    assert!(drew(&events));

    // Nothing changed since the last frame.
    assert!(!image.perform_display(false));

    image
        .execute(&VhwaCommand::SurfFlip(SurfFlip {
            targ_handle: back,
            targ_offset: BACK_OFFSET,
            curr_handle: front,
            curr_offset: FRONT_OFFSET,
            flags: 0,
            updated_targ_mem: Some(RectL::new(0, 0, 320, 240)),
            updated_curr_mem: None,
        }))
        .unwrap();
    image.update_viewport(Rect::from_size(640, 480));
    image.gl_mut().take_events();
    assert!(image.perform_display(false));
    assert!(drew(&image.gl_mut().take_events()));

    for handle in [front, back] {
        image
            .execute(&VhwaCommand::SurfDestroy(SurfDestroy { handle }))
            .unwrap();
    }
    assert!(image.display().overlays().is_empty());
    assert!(!image.has_visible_overlays());
    assert!(image.display().vga().is_some());
    assert!(image.gl().live_displays() > 0);
}

#[test]
fn fullscreen_overlay_hides_the_primary() {
    let (mut image, _vram) = image_with_vram();
    let primary = create(&mut image, &primary_desc());
    let overlay = create(
        &mut image,
        &overlay_desc(FOURCC_YV12, 320, 240, 0, FRONT_OFFSET),
    );
    image
        .execute(&show_overlay(
            overlay,
            primary,
            RectL::new(0, 0, 640, 480),
            RectL::new(0, 0, 320, 240),
        ))
        .unwrap();
    image.update_viewport(Rect::from_size(640, 480));
    assert!(!image.display().display_primary());
    assert_eq!(image.overlays_rect_intersection(), Rect::from_size(640, 480));
}
