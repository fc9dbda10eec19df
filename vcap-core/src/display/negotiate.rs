//! Output negotiation: controller, connector, plane and mode selection
//!
//! Negotiation runs once, before streaming starts:
//! 1. Allocate the scanout pool
//! 2. Enable universal planes so the primary plane is visible to us
//! 3. Take the first CRTC and the first connector
//! 4. Pick a free plane that the CRTC can drive in the frame format, falling
//!    back to the primary plane
//! 5. Program the connector's mode matching the frame size
//! 6. Optionally hide the primary plane underneath an overlay
//!
//! The resulting [`Display`] shows scanout buffers by index and puts the
//! controller back the way it found it on [`Display::restore`] or drop.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::device::{CrtcState, DisplayDevice, ModeInfo, PlaneState, PropertyInfo, Rect};
use super::scanout::ScanoutPool;
use crate::error::{IoResultExt, Result, VcapError};
use crate::formats;
use crate::pack::PackedLayout;

/// Role a plane plays, read from its `type` property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaneRole {
    Primary,
    Overlay,
    Cursor,
    Unknown,
}

impl std::fmt::Display for PlaneRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Primary => "primary",
            Self::Overlay => "overlay",
            Self::Cursor => "cursor",
            Self::Unknown => "unknown",
        };
        f.pad(name)
    }
}

/// A plane together with its role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub state: PlaneState,
    pub role: PlaneRole,
}

impl Plane {
    /// Plane id
    pub fn id(&self) -> u32 {
        self.state.id
    }

    /// Whether this plane is free and can show `format` on the CRTC at `crtc_index`
    pub fn is_candidate(&self, crtc_index: usize, format: u32) -> bool {
        self.role != PlaneRole::Cursor
            && self.state.crtc.is_none()
            && crtc_index < 32
            && self.state.possible_crtcs & (1 << crtc_index) != 0
            && self.state.formats.contains(&format)
    }
}

/// Outcome of plane discovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaneSelection {
    /// First primary plane seen
    pub primary: Option<Plane>,
    /// First free plane able to show the frame format
    pub candidate: Option<Plane>,
}

/// How frames reach the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// Frames go to a dedicated plane via SETPLANE
    Plane(u32),
    /// Frames replace the primary framebuffer via SETCRTC
    Primary(u32),
}

/// What the negotiator should produce
#[derive(Debug, Clone, Copy)]
pub struct DisplayRequest {
    /// Frame geometry shared with the capture side
    pub layout: PackedLayout,
    /// DRM fourcc of the frames
    pub format: u32,
    /// Number of scanout buffers
    pub buffers: usize,
    /// Hide the primary plane when frames go to another plane
    pub hide_primary: bool,
}

/// Classify a plane from its property list
///
/// Looks for a property named `type` and matches its current value against
/// the enum table. Anything missing or unrecognised is `Unknown`.
pub fn classify_plane(properties: &[PropertyInfo]) -> PlaneRole {
    let Some(prop) = properties.iter().find(|p| p.name == "type") else {
        return PlaneRole::Unknown;
    };

    match prop
        .enums
        .iter()
        .find(|e| e.value == prop.value)
        .map(|e| e.name.as_str())
    {
        Some("Primary") => PlaneRole::Primary,
        Some("Overlay") => PlaneRole::Overlay,
        Some("Cursor") => PlaneRole::Cursor,
        _ => PlaneRole::Unknown,
    }
}

/// First mode whose active area is exactly `width` x `height`
pub fn find_mode(modes: &[ModeInfo], width: u32, height: u32) -> Result<ModeInfo> {
    modes
        .iter()
        .find(|m| m.size() == (width, height))
        .cloned()
        .ok_or(VcapError::ModeNotFound { width, height })
}

/// Choose the first primary plane and the first candidate, in enumeration order
pub fn select_planes(
    planes: impl IntoIterator<Item = Plane>,
    crtc_index: usize,
    format: u32,
) -> PlaneSelection {
    let mut selection = PlaneSelection::default();
    for plane in planes {
        if selection.candidate.is_none() && plane.is_candidate(crtc_index, format) {
            selection.candidate = Some(plane.clone());
        }
        if selection.primary.is_none() && plane.role == PlaneRole::Primary {
            selection.primary = Some(plane);
        }
    }
    selection
}

/// Read every plane with its role
pub fn enumerate_planes<D: DisplayDevice>(device: &D) -> Result<Vec<Plane>> {
    let ids = device.plane_ids().kernel("DRM_IOCTL_MODE_GETPLANERESOURCES")?;
    ids.into_iter()
        .map(|id| {
            let state = device.plane(id).kernel("DRM_IOCTL_MODE_GETPLANE")?;
            let props = device
                .plane_properties(id)
                .kernel("DRM_IOCTL_MODE_OBJ_GETPROPERTIES")?;
            Ok(Plane {
                state,
                role: classify_plane(&props),
            })
        })
        .collect()
}

/// The controller/connector pair frames are shown on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub crtc: u32,
    /// Position of `crtc` in the resource list, used against `possible_crtcs`
    pub crtc_index: usize,
    pub connector: u32,
}

/// Pick the first CRTC and the first connector
pub fn find_output<D: DisplayDevice>(device: &D) -> Result<Output> {
    let resources = device.resources().kernel("DRM_IOCTL_MODE_GETRESOURCES")?;
    let (Some(&crtc), Some(&connector)) = (resources.crtcs.first(), resources.connectors.first())
    else {
        return Err(VcapError::display(format!(
            "device reports {} CRTCs and {} connectors",
            resources.crtcs.len(),
            resources.connectors.len()
        )));
    };

    Ok(Output {
        crtc,
        crtc_index: 0,
        connector,
    })
}

struct Setup {
    output: Output,
    mode: ModeInfo,
    saved: CrtcState,
    planes: PlaneSelection,
    presentation: Presentation,
    primary_hidden: bool,
}

/// A negotiated display ready to show scanout buffers
pub struct Display<D: DisplayDevice> {
    device: D,
    pool: Option<ScanoutPool<D::Mapping>>,
    output: Output,
    mode: ModeInfo,
    saved: CrtcState,
    planes: PlaneSelection,
    presentation: Presentation,
    primary_hidden: bool,
    shown: Option<usize>,
    restored: bool,
}

impl<D: DisplayDevice> Display<D> {
    /// Negotiate an output for `request`
    ///
    /// On failure every scanout buffer created so far is released.
    pub fn negotiate(device: D, request: &DisplayRequest) -> Result<Self> {
        let pool = ScanoutPool::create(&device, request.buffers, request.layout, request.format)?;

        match Self::configure(&device, &pool, request) {
            Ok(setup) => Ok(Self {
                device,
                pool: Some(pool),
                output: setup.output,
                mode: setup.mode,
                saved: setup.saved,
                planes: setup.planes,
                presentation: setup.presentation,
                primary_hidden: setup.primary_hidden,
                shown: None,
                restored: false,
            }),
            Err(e) => {
                if let Err(cleanup) = pool.destroy(&device) {
                    warn!("Scanout cleanup after failed negotiation: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    fn configure(
        device: &D,
        pool: &ScanoutPool<D::Mapping>,
        request: &DisplayRequest,
    ) -> Result<Setup> {
        device.enable_universal_planes().map_err(|e| {
            VcapError::Unsupported(format!("universal planes not supported: {}", e))
        })?;

        let output = find_output(device)?;
        debug!(
            "Using CRTC {} (index {}) and connector {}",
            output.crtc, output.crtc_index, output.connector
        );

        let planes = select_planes(enumerate_planes(device)?, output.crtc_index, request.format);
        let presentation = match (&planes.candidate, &planes.primary) {
            (Some(plane), _) if plane.role == PlaneRole::Primary => Presentation::Primary(plane.id()),
            (Some(plane), _) => Presentation::Plane(plane.id()),
            (None, Some(primary)) => {
                info!(
                    "No free plane supports {}, falling back to primary plane {}",
                    formats::format_name(request.format),
                    primary.id()
                );
                Presentation::Primary(primary.id())
            }
            (None, None) => {
                return Err(VcapError::NoPlane(format!(
                    "nothing on CRTC {} supports {}",
                    output.crtc,
                    formats::format_name(request.format)
                )));
            }
        };

        let saved = device.crtc(output.crtc).kernel("DRM_IOCTL_MODE_GETCRTC")?;
        let modes = device
            .connector_modes(output.connector)
            .kernel("DRM_IOCTL_MODE_GETCONNECTOR")?;
        let layout = pool.layout();
        let mode = find_mode(&modes, layout.width(), layout.height())?;

        let framebuffer = saved
            .framebuffer
            .or_else(|| pool.buffer_at(0).map(|b| b.framebuffer()));
        let anchor = planes.primary.as_ref().map_or((0, 0), |p| p.state.position);
        device
            .set_crtc(output.crtc, framebuffer, anchor, &[output.connector], Some(&mode))
            .kernel("DRM_IOCTL_MODE_SETCRTC")?;
        info!("Mode set: {} ({}x{}@{})", mode.name, mode.hdisplay, mode.vdisplay, mode.vrefresh);

        let mut primary_hidden = false;
        if let (Presentation::Plane(_), Some(primary), true) =
            (presentation, &planes.primary, request.hide_primary)
        {
            device
                .set_plane(primary.id(), output.crtc, None, Rect::default(), Rect::default())
                .kernel("DRM_IOCTL_MODE_SETPLANE")?;
            primary_hidden = true;
            debug!("Primary plane {} hidden", primary.id());
        }

        Ok(Setup {
            output,
            mode,
            saved,
            planes,
            presentation,
            primary_hidden,
        })
    }

    /// Show scanout buffer `index`
    ///
    /// Committing the buffer already on screen is harmless.
    pub fn commit(&mut self, index: usize) -> Result<()> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| VcapError::display("display already torn down"))?;
        let buffer = pool.buffer_at(index).ok_or_else(|| {
            VcapError::display(format!(
                "scanout index {} outside pool of {}",
                index,
                pool.count()
            ))
        })?;
        let layout = pool.layout();
        let framebuffer = buffer.framebuffer();

        match self.presentation {
            Presentation::Plane(plane) => {
                let area = Rect::sized(layout.width(), layout.height());
                self.device
                    .set_plane(plane, self.output.crtc, Some(framebuffer), area, area)
                    .kernel("DRM_IOCTL_MODE_SETPLANE")?;
            }
            Presentation::Primary(_) => {
                self.device
                    .set_crtc(
                        self.output.crtc,
                        Some(framebuffer),
                        (0, 0),
                        &[self.output.connector],
                        Some(&self.mode),
                    )
                    .kernel("DRM_IOCTL_MODE_SETCRTC")?;
            }
        }

        self.shown = Some(index);
        Ok(())
    }

    /// Put the controller back the way negotiation found it
    ///
    /// Both the overlay detach and the CRTC reprogram are attempted even
    /// if the first fails; the first error is returned and a later call
    /// tries again.
    pub fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }

        let detached = match self.presentation {
            Presentation::Plane(plane) => self
                .device
                .set_plane(plane, self.output.crtc, None, Rect::default(), Rect::default())
                .kernel("DRM_IOCTL_MODE_SETPLANE"),
            Presentation::Primary(_) => Ok(()),
        };

        let connectors: &[u32] = if self.saved.mode.is_some() {
            std::slice::from_ref(&self.output.connector)
        } else {
            &[]
        };
        let reprogrammed = self
            .device
            .set_crtc(
                self.output.crtc,
                self.saved.framebuffer,
                self.saved.position,
                connectors,
                self.saved.mode.as_ref(),
            )
            .kernel("DRM_IOCTL_MODE_SETCRTC");

        detached.and(reprogrammed)?;

        self.restored = true;
        self.shown = None;
        info!("Display restored");
        Ok(())
    }

    /// Scanout buffers
    pub fn scanout(&self) -> Option<&ScanoutPool<D::Mapping>> {
        self.pool.as_ref()
    }

    /// Mutable scanout buffers
    pub fn scanout_mut(&mut self) -> Option<&mut ScanoutPool<D::Mapping>> {
        self.pool.as_mut()
    }

    /// Number of scanout buffers
    pub fn buffer_count(&self) -> usize {
        self.pool.as_ref().map_or(0, ScanoutPool::count)
    }

    /// Chosen CRTC and connector
    pub fn output(&self) -> &Output {
        &self.output
    }

    /// Programmed mode
    pub fn mode(&self) -> &ModeInfo {
        &self.mode
    }

    /// Plane discovery result
    pub fn planes(&self) -> &PlaneSelection {
        &self.planes
    }

    /// Where frames are sent
    pub fn presentation(&self) -> Presentation {
        self.presentation
    }

    /// Whether the primary plane was hidden during negotiation
    pub fn primary_hidden(&self) -> bool {
        self.primary_hidden
    }

    /// Index of the buffer currently on screen
    pub fn shown(&self) -> Option<usize> {
        self.shown
    }

    /// Underlying device
    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: DisplayDevice> Drop for Display<D> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("Failed to restore display: {}", e);
        }
        if let Some(pool) = self.pool.take() {
            if let Err(e) = pool.destroy(&self.device) {
                warn!("Failed to release scanout buffers: {}", e);
            }
        }
    }
}

/// Connector summary for reporting
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorReport {
    pub id: u32,
    pub modes: Vec<ModeInfo>,
}

/// Plane summary for reporting
#[derive(Debug, Clone, Serialize)]
pub struct PlaneReport {
    pub id: u32,
    pub role: PlaneRole,
    pub crtc: Option<u32>,
    pub possible_crtcs: u32,
    pub formats: Vec<String>,
}

/// Everything the device exposes, for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct Inventory {
    pub crtcs: Vec<u32>,
    pub connectors: Vec<ConnectorReport>,
    pub planes: Vec<PlaneReport>,
}

/// Collect CRTCs, connectors with their modes, and classified planes
///
/// Enables universal planes first so primary and cursor planes are listed.
pub fn inventory<D: DisplayDevice>(device: &D) -> Result<Inventory> {
    if let Err(e) = device.enable_universal_planes() {
        warn!("Universal planes unavailable, listing overlays only: {}", e);
    }

    let resources = device.resources().kernel("DRM_IOCTL_MODE_GETRESOURCES")?;
    let connectors = resources
        .connectors
        .iter()
        .map(|&id| {
            let modes = device
                .connector_modes(id)
                .kernel("DRM_IOCTL_MODE_GETCONNECTOR")?;
            Ok(ConnectorReport { id, modes })
        })
        .collect::<Result<Vec<_>>>()?;

    let planes = enumerate_planes(device)?
        .into_iter()
        .map(|p| PlaneReport {
            id: p.state.id,
            role: p.role,
            crtc: p.state.crtc,
            possible_crtcs: p.state.possible_crtcs,
            formats: p
                .state
                .formats
                .iter()
                .map(|&f| formats::fourcc_to_string(f))
                .collect(),
        })
        .collect();

    Ok(Inventory {
        crtcs: resources.crtcs,
        connectors,
        planes,
    })
}
