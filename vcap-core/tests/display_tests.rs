//! Display negotiation and scanout pool tests

mod mocks;

use mocks::*;
use vcap_core::display::{
    inventory, Display, DisplayRequest, PlaneRole, Presentation, Resources, ScanoutPool,
};
use vcap_core::formats::fourcc;
use vcap_core::{ErrorKind, PackedLayout, VcapError};

fn layout(width: u32, height: u32) -> PackedLayout {
    PackedLayout::new(width, height, BPP, STRIDE).unwrap()
}

fn request(buffers: usize) -> DisplayRequest {
    DisplayRequest {
        layout: layout(WIDTH, HEIGHT),
        format: fourcc::YUYV,
        buffers,
        hide_primary: true,
    }
}

/// Assert nothing allocated on the device outlived the test subject
fn assert_released(device: &MockDisplay) {
    let state = device.state.borrow();
    assert!(state.live_dumbs.is_empty(), "dumb buffers leaked: {:?}", state.live_dumbs);
    assert!(state.live_fbs.is_empty(), "framebuffers leaked: {:?}", state.live_fbs);
}

#[test]
fn test_negotiate_prefers_free_overlay() {
    let log = event_log();
    let display = Display::negotiate(MockDisplay::standard(&log), &request(4)).unwrap();

    assert_eq!(display.presentation(), Presentation::Plane(OVERLAY));
    assert_eq!(display.output().crtc, CRTC);
    assert_eq!(display.output().connector, CONNECTOR);
    assert_eq!(display.mode().size(), (640, 480));
    assert_eq!(display.buffer_count(), 4);

    let planes = display.planes();
    assert_eq!(planes.primary.as_ref().map(|p| p.id()), Some(PRIMARY));
    assert_eq!(planes.candidate.as_ref().map(|p| p.role), Some(PlaneRole::Overlay));
}

#[test]
fn test_negotiate_sets_mode_then_hides_primary() {
    let log = event_log();
    let display = Display::negotiate(MockDisplay::standard(&log), &request(2)).unwrap();
    assert!(display.primary_hidden());

    let events = log.borrow();
    let modeset = events
        .iter()
        .position(|e| {
            *e == Event::SetCrtc {
                crtc: CRTC,
                framebuffer: Some(SAVED_FB),
            }
        })
        .expect("mode set");
    let hide = events
        .iter()
        .position(|e| {
            *e == Event::SetPlane {
                plane: PRIMARY,
                framebuffer: None,
            }
        })
        .expect("primary hidden");
    assert!(modeset < hide);
}

#[test]
fn test_negotiate_keeps_primary_when_asked() {
    let log = event_log();
    let request = DisplayRequest {
        hide_primary: false,
        ..request(2)
    };
    let display = Display::negotiate(MockDisplay::standard(&log), &request).unwrap();

    assert_eq!(display.presentation(), Presentation::Plane(OVERLAY));
    assert!(!display.primary_hidden());
    assert!(!log.borrow().contains(&Event::SetPlane {
        plane: PRIMARY,
        framebuffer: None,
    }));
}

#[test]
fn test_negotiate_skips_overlay_on_other_crtc() {
    let log = event_log();
    let device = MockDisplay::standard(&log).edit(|state| {
        state.planes[1].0.possible_crtcs = 0b10;
    });
    let display = Display::negotiate(device, &request(2)).unwrap();

    assert_eq!(display.presentation(), Presentation::Primary(PRIMARY));
    assert!(!display.primary_hidden());
}

#[test]
fn test_negotiate_skips_attached_overlay() {
    let log = event_log();
    let device = MockDisplay::standard(&log).edit(|state| {
        state.planes[1].0.crtc = Some(CRTC);
    });
    let display = Display::negotiate(device, &request(2)).unwrap();

    assert_eq!(display.presentation(), Presentation::Primary(PRIMARY));
}

#[test]
fn test_negotiate_uses_free_primary_directly() {
    let log = event_log();
    let device = MockDisplay::standard(&log).edit(|state| {
        state.planes = vec![(
            plane_state(PRIMARY, None, 0b1, &[fourcc::YUYV]),
            Some("Primary"),
        )];
    });
    let display = Display::negotiate(device, &request(2)).unwrap();

    assert_eq!(display.presentation(), Presentation::Primary(PRIMARY));
    assert!(!display.primary_hidden());
}

#[test]
fn test_negotiate_without_any_plane_fails_cleanly() {
    let log = event_log();
    let device = MockDisplay::standard(&log).edit(|state| {
        state.planes.retain(|(p, _)| p.id == CURSOR);
    });

    let err = Display::negotiate(device.clone(), &request(3)).err().unwrap();
    assert!(matches!(err, VcapError::NoPlane(_)));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_released(&device);
}

#[test]
fn test_unsupported_resolution_is_reported() {
    let log = event_log();
    let device = MockDisplay::standard(&log);
    let request = DisplayRequest {
        layout: layout(800, 600),
        ..request(2)
    };

    let err = Display::negotiate(device.clone(), &request).err().unwrap();
    assert!(matches!(
        err,
        VcapError::ModeNotFound {
            width: 800,
            height: 600
        }
    ));
    assert!(err.to_string().contains("800x600"));
    assert_released(&device);
    assert!(!log
        .borrow()
        .iter()
        .any(|e| matches!(e, Event::SetCrtc { .. })));
}

#[test]
fn test_empty_resources_are_an_error() {
    let log = event_log();
    let device = MockDisplay::standard(&log).edit(|state| {
        state.resources = Resources {
            crtcs: vec![CRTC],
            connectors: Vec::new(),
        };
    });

    let err = Display::negotiate(device.clone(), &request(2)).err().unwrap();
    assert!(matches!(err, VcapError::Display(_)));
    assert_released(&device);
}

#[test]
fn test_universal_planes_required() {
    let log = event_log();
    let device = MockDisplay::standard(&log).edit(|state| state.universal_planes = false);

    let err = Display::negotiate(device.clone(), &request(2)).err().unwrap();
    assert!(matches!(err, VcapError::Unsupported(_)));
    assert_released(&device);
}

#[test]
fn test_mode_set_uses_scanout_when_crtc_idle() {
    let log = event_log();
    let device = MockDisplay::standard(&log).edit(|state| state.crtc.framebuffer = None);
    let display = Display::negotiate(device, &request(2)).unwrap();

    let fb0 = display.scanout().unwrap().buffer_at(0).unwrap().framebuffer();
    assert!(log.borrow().contains(&Event::SetCrtc {
        crtc: CRTC,
        framebuffer: Some(fb0),
    }));
}

#[test]
fn test_commit_rejects_unknown_index() {
    let log = event_log();
    let mut display = Display::negotiate(MockDisplay::standard(&log), &request(2)).unwrap();

    assert!(display.commit(1).is_ok());
    assert!(matches!(display.commit(2), Err(VcapError::Display(_))));
    assert_eq!(display.shown(), Some(1));
}

#[test]
fn test_commit_same_index_twice_is_idempotent() {
    let log = event_log();
    let mut display = Display::negotiate(MockDisplay::standard(&log), &request(2)).unwrap();
    let fb0 = display.scanout().unwrap().buffer_at(0).unwrap().framebuffer();
    log.borrow_mut().clear();

    display.commit(0).unwrap();
    display.commit(0).unwrap();

    let shown = Event::SetPlane {
        plane: OVERLAY,
        framebuffer: Some(fb0),
    };
    assert_eq!(*log.borrow(), vec![shown.clone(), shown]);
    assert_eq!(display.shown(), Some(0));
}

#[test]
fn test_primary_commit_same_index_twice_is_idempotent() {
    let log = event_log();
    let device = MockDisplay::standard(&log).edit(|state| {
        state.planes[1].0.possible_crtcs = 0b10;
    });
    let mut display = Display::negotiate(device, &request(2)).unwrap();
    assert_eq!(display.presentation(), Presentation::Primary(PRIMARY));
    let fb0 = display.scanout().unwrap().buffer_at(0).unwrap().framebuffer();
    log.borrow_mut().clear();

    display.commit(0).unwrap();
    display.commit(0).unwrap();

    let shown = Event::SetCrtc {
        crtc: CRTC,
        framebuffer: Some(fb0),
    };
    assert_eq!(*log.borrow(), vec![shown.clone(), shown]);
    assert_eq!(display.shown(), Some(0));
}

#[test]
fn test_restore_detaches_overlay_and_reprograms_crtc() {
    let log = event_log();
    let mut display = Display::negotiate(MockDisplay::standard(&log), &request(2)).unwrap();
    display.commit(0).unwrap();
    log.borrow_mut().clear();

    display.restore().unwrap();
    assert_eq!(
        *log.borrow(),
        vec![
            Event::SetPlane {
                plane: OVERLAY,
                framebuffer: None,
            },
            Event::SetCrtc {
                crtc: CRTC,
                framebuffer: Some(SAVED_FB),
            },
        ]
    );
    assert_eq!(display.shown(), None);

    // A second restore is a no-op.
    display.restore().unwrap();
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn test_restore_reprograms_crtc_when_detach_fails() {
    let log = event_log();
    let device = MockDisplay::standard(&log);
    let mut display = Display::negotiate(device.clone(), &request(2)).unwrap();
    display.commit(0).unwrap();
    device.state.borrow_mut().failing_set_planes = 1;
    log.borrow_mut().clear();

    let err = display.restore().unwrap_err();
    assert!(matches!(err, VcapError::Kernel { op: "DRM_IOCTL_MODE_SETPLANE", .. }));
    assert!(log.borrow().contains(&Event::SetCrtc {
        crtc: CRTC,
        framebuffer: Some(SAVED_FB),
    }));

    // The failed restore is retried.
    log.borrow_mut().clear();
    display.restore().unwrap();
    assert_eq!(log.borrow().len(), 2);
    assert_eq!(display.shown(), None);
}

#[test]
fn test_drop_restores_and_releases_scanout() {
    let log = event_log();
    let device = MockDisplay::standard(&log);
    let display = Display::negotiate(device.clone(), &request(4)).unwrap();
    assert_eq!(device.state.borrow().live_dumbs.len(), 4);
    log.borrow_mut().clear();

    drop(display);

    assert_released(&device);
    let events = log.borrow();
    assert!(events.contains(&Event::SetCrtc {
        crtc: CRTC,
        framebuffer: Some(SAVED_FB),
    }));
    // Reverse creation order, framebuffer before its dumb buffer.
    let teardown: Vec<&Event> = events
        .iter()
        .filter(|e| matches!(e, Event::RemoveFb(_) | Event::DestroyDumb(_)))
        .collect();
    assert_eq!(teardown.len(), 8);
    assert_eq!(*teardown[0], Event::RemoveFb(103));
    assert_eq!(*teardown[1], Event::DestroyDumb(4));
    assert_eq!(*teardown[7], Event::DestroyDumb(1));
}

#[test]
fn test_scanout_buffers_hold_full_stride() {
    let log = event_log();
    let device = MockDisplay::standard(&log);
    let pool = ScanoutPool::create(&device, 3, layout(WIDTH, HEIGHT), fourcc::YUYV).unwrap();

    assert_eq!(pool.count(), 3);
    for index in 0..pool.count() {
        let buffer = pool.buffer_at(index).unwrap();
        assert_eq!(buffer.index(), index);
        assert_eq!(buffer.stride(), STRIDE);
        assert!(buffer.total_length() >= (STRIDE * HEIGHT) as usize);
    }
    assert!(pool.buffer_at(3).is_none());

    pool.destroy(&device).unwrap();
    assert_released(&device);
}

#[test]
fn test_scanout_rejects_mismatched_format() {
    let log = event_log();
    let device = MockDisplay::standard(&log);

    let err = ScanoutPool::create(&device, 2, layout(WIDTH, HEIGHT), fourcc::XRGB8888).unwrap_err();
    assert!(matches!(err, VcapError::Config(_)));

    let err = ScanoutPool::create(&device, 0, layout(WIDTH, HEIGHT), fourcc::YUYV).unwrap_err();
    assert!(matches!(err, VcapError::Config(_)));
    assert!(log.borrow().is_empty());
}

#[test]
fn test_scanout_rolls_back_on_framebuffer_failure() {
    let log = event_log();
    let device = MockDisplay::standard(&log).edit(|state| state.fail_add_fb_at = Some(2));

    let err = ScanoutPool::create(&device, 4, layout(WIDTH, HEIGHT), fourcc::YUYV).unwrap_err();
    assert!(matches!(err, VcapError::Kernel { op: "DRM_IOCTL_MODE_ADDFB2", .. }));
    assert_released(&device);

    let destroyed = log
        .borrow()
        .iter()
        .filter(|e| matches!(e, Event::DestroyDumb(_)))
        .count();
    assert_eq!(destroyed, 3);
}

#[test]
fn test_scanout_rolls_back_on_map_failure() {
    let log = event_log();
    let device = MockDisplay::standard(&log).edit(|state| state.fail_map_at = Some(1));

    let err = ScanoutPool::create(&device, 4, layout(WIDTH, HEIGHT), fourcc::YUYV).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Kernel);
    assert_released(&device);

    // The failing buffer's framebuffer was registered, then removed.
    assert!(log.borrow().contains(&Event::RemoveFb(101)));
}

#[test]
fn test_inventory_lists_planes_with_roles() {
    let log = event_log();
    let report = inventory(&MockDisplay::standard(&log)).unwrap();

    assert_eq!(report.crtcs, vec![CRTC]);
    assert_eq!(report.connectors.len(), 1);
    assert_eq!(report.connectors[0].modes.len(), 3);

    let roles: Vec<(u32, PlaneRole)> = report.planes.iter().map(|p| (p.id, p.role)).collect();
    assert_eq!(
        roles,
        vec![
            (PRIMARY, PlaneRole::Primary),
            (OVERLAY, PlaneRole::Overlay),
            (CURSOR, PlaneRole::Cursor),
        ]
    );
    assert_eq!(report.planes[1].formats, vec!["XR24", "YUYV"]);
}
