//! Mock infrastructure for testing
//!
//! Scripted stand-ins for the capture driver and the display device. Both
//! append to a shared [`EventLog`] so tests can check the order in which
//! kernel calls would have been made.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::time::Duration;

use vcap_core::capture::{CaptureDriver, CapturePool};
use vcap_core::display::{
    CrtcState, DisplayDevice, DumbAllocation, EnumEntry, ModeInfo, PlaneState, PropertyInfo, Rect,
    Resources,
};
use vcap_core::formats::fourcc;

/// A kernel call as seen by a mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Request(u32),
    Queue(u32),
    Dequeue(u32),
    CreateDumb(u32),
    DestroyDumb(u32),
    AddFb(u32),
    RemoveFb(u32),
    SetCrtc {
        crtc: u32,
        framebuffer: Option<u32>,
    },
    SetPlane {
        plane: u32,
        framebuffer: Option<u32>,
    },
}

/// Shared, ordered record of mock calls
pub type EventLog = Rc<RefCell<Vec<Event>>>;

/// Create an empty event log
pub fn event_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// 640x480 YUYV
pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;
pub const BPP: u32 = 2;
pub const STRIDE: u32 = 2048;
pub const FRAME_LEN: usize = (WIDTH * HEIGHT * BPP) as usize;

/// Byte the mock driver writes at `offset` of buffer `index`
pub fn pattern_byte(index: u32, offset: usize) -> u8 {
    (offset as u32).wrapping_mul(31).wrapping_add(index * 7 + 1) as u8
}

/// What the next readiness wait reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// A buffer is ready
    Ready,
    /// Nothing within the timeout
    Timeout,
    /// Interrupted by a signal
    Interrupted,
    /// Woken up, but the queue turns out to be empty
    Spurious,
}

/// Scripted capture driver
///
/// Hands buffers back in the order they were queued. Once the wait script
/// runs out every wait reports `Ready`.
pub struct MockCapture {
    log: EventLog,
    grant: u32,
    request_error: Option<io::ErrorKind>,
    buffer_len: usize,
    frame_len: usize,
    queued: VecDeque<u32>,
    waits: VecDeque<Wait>,
    spurious: bool,
    fail_map: Option<u32>,
    injected: VecDeque<u32>,
}

impl MockCapture {
    /// Driver granting `grant` buffers of one 640x480 YUYV frame each
    pub fn new(log: &EventLog, grant: u32) -> Self {
        Self {
            log: log.clone(),
            grant,
            request_error: None,
            buffer_len: FRAME_LEN,
            frame_len: FRAME_LEN,
            queued: VecDeque::new(),
            waits: VecDeque::new(),
            spurious: false,
            fail_map: None,
            injected: VecDeque::new(),
        }
    }

    /// Script the readiness waits
    pub fn with_waits(mut self, waits: impl IntoIterator<Item = Wait>) -> Self {
        self.waits = waits.into_iter().collect();
        self
    }

    /// Fail REQBUFS with `kind`
    pub fn with_request_error(mut self, kind: io::ErrorKind) -> Self {
        self.request_error = Some(kind);
        self
    }

    /// Fail mapping buffer `index`
    pub fn with_map_failure(mut self, index: u32) -> Self {
        self.fail_map = Some(index);
        self
    }

    /// Report `bytes` filled per frame regardless of buffer size
    pub fn with_frame_len(mut self, bytes: usize) -> Self {
        self.frame_len = bytes;
        self
    }

    /// Make the next dequeue return `index` whether or not it was queued
    pub fn inject_dequeue(&mut self, index: u32) {
        self.injected.push_back(index);
    }
}

impl CaptureDriver for MockCapture {
    type Mapping = Vec<u8>;

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.log.borrow_mut().push(Event::Request(count));
        match self.request_error {
            Some(kind) => Err(kind.into()),
            None => Ok(self.grant),
        }
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<Vec<u8>> {
        if self.fail_map == Some(index) {
            return Err(io::ErrorKind::OutOfMemory.into());
        }
        Ok((0..self.buffer_len)
            .map(|offset| pattern_byte(index, offset))
            .collect())
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        self.log.borrow_mut().push(Event::Queue(index));
        self.queued.push_back(index);
        Ok(())
    }

    fn dequeue(&mut self) -> io::Result<(u32, usize)> {
        if std::mem::take(&mut self.spurious) {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let index = match self.injected.pop_front() {
            Some(index) => index,
            None => self
                .queued
                .pop_front()
                .ok_or(io::Error::from(io::ErrorKind::WouldBlock))?,
        };
        self.log.borrow_mut().push(Event::Dequeue(index));
        Ok((index, self.frame_len))
    }

    fn wait_ready(&mut self, _timeout: Duration) -> io::Result<bool> {
        match self.waits.pop_front().unwrap_or(Wait::Ready) {
            Wait::Ready => Ok(true),
            Wait::Timeout => Ok(false),
            Wait::Interrupted => Err(io::ErrorKind::Interrupted.into()),
            Wait::Spurious => {
                self.spurious = true;
                Ok(true)
            }
        }
    }
}

/// Initialized, mapped and fully queued pool over `driver`
pub fn streaming_pool(driver: MockCapture, buffers: u32) -> CapturePool<MockCapture> {
    let mut pool = CapturePool::initialize(driver, buffers, buffers).unwrap();
    pool.map_all().unwrap();
    pool.enqueue_all().unwrap();
    pool
}

pub const CRTC: u32 = 40;
pub const CONNECTOR: u32 = 50;
pub const PRIMARY: u32 = 30;
pub const OVERLAY: u32 = 31;
pub const CURSOR: u32 = 32;
pub const SAVED_FB: u32 = 90;

/// Extra bytes the mock driver rounds every dumb allocation up by
pub const DUMB_SLACK: u64 = 4096;

/// Mutable state behind a [`MockDisplay`]
pub struct DisplayState {
    pub resources: Resources,
    pub modes: Vec<ModeInfo>,
    pub crtc: CrtcState,
    /// Planes with the name of their `type` enum value, if any
    pub planes: Vec<(PlaneState, Option<&'static str>)>,
    pub universal_planes: bool,
    pub fail_add_fb_at: Option<usize>,
    pub fail_map_at: Option<usize>,
    /// Number of upcoming SETPLANE calls that fail
    pub failing_set_planes: usize,
    pub live_dumbs: Vec<u32>,
    pub live_fbs: Vec<u32>,
    next_handle: u32,
    next_fb: u32,
    add_fb_calls: usize,
    map_calls: usize,
}

/// Scripted KMS device
#[derive(Clone)]
pub struct MockDisplay {
    pub state: Rc<RefCell<DisplayState>>,
    log: EventLog,
}

pub fn mode(width: u16, height: u16) -> ModeInfo {
    ModeInfo {
        clock: 25_175,
        hdisplay: width,
        vdisplay: height,
        htotal: width + 160,
        vtotal: height + 45,
        vrefresh: 60,
        name: format!("{}x{}", width, height),
        ..Default::default()
    }
}

pub fn plane_state(id: u32, crtc: Option<u32>, possible: u32, formats: &[u32]) -> PlaneState {
    PlaneState {
        id,
        crtc,
        framebuffer: crtc.map(|_| SAVED_FB),
        possible_crtcs: possible,
        formats: formats.to_vec(),
        position: (0, 0),
    }
}

impl MockDisplay {
    /// One CRTC driving one connector with a primary plane in use, a free
    /// YUYV-capable overlay and a cursor plane
    pub fn standard(log: &EventLog) -> Self {
        let state = DisplayState {
            resources: Resources {
                crtcs: vec![CRTC],
                connectors: vec![CONNECTOR],
            },
            modes: vec![mode(1920, 1080), mode(1280, 720), mode(640, 480)],
            crtc: CrtcState {
                id: CRTC,
                framebuffer: Some(SAVED_FB),
                position: (0, 0),
                mode: Some(mode(1920, 1080)),
            },
            planes: vec![
                (
                    plane_state(PRIMARY, Some(CRTC), 0b1, &[fourcc::XRGB8888]),
                    Some("Primary"),
                ),
                (
                    plane_state(OVERLAY, None, 0b1, &[fourcc::XRGB8888, fourcc::YUYV]),
                    Some("Overlay"),
                ),
                (
                    plane_state(CURSOR, None, 0b1, &[fourcc::ARGB8888, fourcc::YUYV]),
                    Some("Cursor"),
                ),
            ],
            universal_planes: true,
            fail_add_fb_at: None,
            fail_map_at: None,
            failing_set_planes: 0,
            live_dumbs: Vec::new(),
            live_fbs: Vec::new(),
            next_handle: 1,
            next_fb: 100,
            add_fb_calls: 0,
            map_calls: 0,
        };

        Self {
            state: Rc::new(RefCell::new(state)),
            log: log.clone(),
        }
    }

    /// Edit the scripted state
    pub fn edit(self, f: impl FnOnce(&mut DisplayState)) -> Self {
        f(&mut self.state.borrow_mut());
        self
    }

    fn record(&self, event: Event) {
        self.log.borrow_mut().push(event);
    }
}

fn type_property(name: &str) -> PropertyInfo {
    let enums = vec![
        EnumEntry {
            value: 0,
            name: "Overlay".into(),
        },
        EnumEntry {
            value: 1,
            name: "Primary".into(),
        },
        EnumEntry {
            value: 2,
            name: "Cursor".into(),
        },
    ];
    let value = enums
        .iter()
        .find(|e| e.name == name)
        .map_or(99, |e| e.value);

    PropertyInfo {
        id: 8,
        name: "type".into(),
        value,
        enums,
    }
}

impl DisplayDevice for MockDisplay {
    type Mapping = Vec<u8>;

    fn enable_universal_planes(&self) -> io::Result<()> {
        if self.state.borrow().universal_planes {
            Ok(())
        } else {
            Err(io::ErrorKind::InvalidInput.into())
        }
    }

    fn resources(&self) -> io::Result<Resources> {
        Ok(self.state.borrow().resources.clone())
    }

    fn connector_modes(&self, _connector: u32) -> io::Result<Vec<ModeInfo>> {
        Ok(self.state.borrow().modes.clone())
    }

    fn crtc(&self, _crtc: u32) -> io::Result<CrtcState> {
        Ok(self.state.borrow().crtc.clone())
    }

    fn set_crtc(
        &self,
        crtc: u32,
        framebuffer: Option<u32>,
        _position: (u32, u32),
        _connectors: &[u32],
        _mode: Option<&ModeInfo>,
    ) -> io::Result<()> {
        self.record(Event::SetCrtc { crtc, framebuffer });
        Ok(())
    }

    fn plane_ids(&self) -> io::Result<Vec<u32>> {
        Ok(self.state.borrow().planes.iter().map(|(p, _)| p.id).collect())
    }

    fn plane(&self, plane: u32) -> io::Result<PlaneState> {
        self.state
            .borrow()
            .planes
            .iter()
            .find(|(p, _)| p.id == plane)
            .map(|(p, _)| p.clone())
            .ok_or(io::ErrorKind::NotFound.into())
    }

    fn plane_properties(&self, plane: u32) -> io::Result<Vec<PropertyInfo>> {
        let state = self.state.borrow();
        let (_, role) = state
            .planes
            .iter()
            .find(|(p, _)| p.id == plane)
            .ok_or(io::Error::from(io::ErrorKind::NotFound))?;
        Ok(role.map(type_property).into_iter().collect())
    }

    fn set_plane(
        &self,
        plane: u32,
        _crtc: u32,
        framebuffer: Option<u32>,
        _dst: Rect,
        _src: Rect,
    ) -> io::Result<()> {
        self.record(Event::SetPlane { plane, framebuffer });
        let mut state = self.state.borrow_mut();
        if state.failing_set_planes > 0 {
            state.failing_set_planes -= 1;
            return Err(io::ErrorKind::InvalidInput.into());
        }
        Ok(())
    }

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> io::Result<DumbAllocation> {
        let mut state = self.state.borrow_mut();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.live_dumbs.push(handle);
        drop(state);

        self.record(Event::CreateDumb(handle));
        let pitch = width * bpp.div_ceil(8);
        Ok(DumbAllocation {
            handle,
            pitch,
            size: pitch as u64 * height as u64 + DUMB_SLACK,
        })
    }

    fn export_prime(&self, _handle: u32) -> io::Result<OwnedFd> {
        Ok(File::open("/dev/null")?.into())
    }

    fn add_framebuffer(
        &self,
        _width: u32,
        _height: u32,
        _format: u32,
        _handle: u32,
        _pitch: u32,
    ) -> io::Result<u32> {
        let mut state = self.state.borrow_mut();
        let call = state.add_fb_calls;
        state.add_fb_calls += 1;
        if state.fail_add_fb_at == Some(call) {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        let fb = state.next_fb;
        state.next_fb += 1;
        state.live_fbs.push(fb);
        drop(state);

        self.record(Event::AddFb(fb));
        Ok(fb)
    }

    fn map_dumb(&self, _handle: u32, size: usize) -> io::Result<Vec<u8>> {
        let mut state = self.state.borrow_mut();
        let call = state.map_calls;
        state.map_calls += 1;
        if state.fail_map_at == Some(call) {
            return Err(io::ErrorKind::OutOfMemory.into());
        }
        // Stale contents that must never reach the screen.
        Ok(vec![0xAA; size])
    }

    fn remove_framebuffer(&self, framebuffer: u32) -> io::Result<()> {
        self.state
            .borrow_mut()
            .live_fbs
            .retain(|&fb| fb != framebuffer);
        self.record(Event::RemoveFb(framebuffer));
        Ok(())
    }

    fn destroy_dumb(&self, handle: u32) -> io::Result<()> {
        self.state.borrow_mut().live_dumbs.retain(|&h| h != handle);
        self.record(Event::DestroyDumb(handle));
        Ok(())
    }
}
