//! DRM card backend
//!
//! Wraps an open `/dev/dri/card*` node and implements [`DisplayDevice`] with
//! the `drm` crate, dropping to `drm-ffi` for dumb buffers.

use std::ffi::c_char;
use std::fs::{File, OpenOptions};
use std::io;
use std::num::NonZeroU32;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};

use drm::buffer::{self, DrmFourcc, DrmModifier, PlanarBuffer};
use drm::control::{self, property, Device as ControlDevice, FbCmd2Flags, Mode};
use drm::{ClientCapability, Device as BasicDevice};
use tracing::{debug, info};

use super::device::{
    CrtcState, DisplayDevice, DumbAllocation, EnumEntry, ModeInfo, PlaneState, PropertyInfo, Rect,
    Resources,
};
use crate::error::{Result, VcapError};
use crate::mapping::MappedRegion;

/// Card nodes scanned when looking a driver up by name
const MAX_CARDS: u32 = 16;

struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl BasicDevice for Card {}
impl ControlDevice for Card {}

/// An open DRM card
pub struct DrmCard {
    card: Card,
    path: PathBuf,
    driver: String,
}

impl DrmCard {
    /// Open a card by device path or by kernel driver name
    ///
    /// Anything containing a `/` is taken as a path. Otherwise the card
    /// nodes are scanned for one whose driver reports `name`.
    pub fn open(name: &str) -> Result<Self> {
        if name.contains('/') {
            return Self::open_path(name);
        }

        for n in 0..MAX_CARDS {
            let path = PathBuf::from(format!("/dev/dri/card{}", n));
            if !path.exists() {
                continue;
            }
            match Self::open_path(&path) {
                Ok(card) if card.driver == name => return Ok(card),
                Ok(card) => debug!("{} is driven by {}, skipping", path.display(), card.driver),
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }

        Err(VcapError::display(format!("no DRM card driven by '{}'", name)))
    }

    /// Open a specific card node
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| VcapError::display(format!("cannot open {}: {}", path.display(), e)))?;
        let card = Card(file);

        let driver = card
            .get_driver()
            .map_err(|e| VcapError::kernel("DRM_IOCTL_VERSION", e))?
            .name()
            .to_string_lossy()
            .into_owned();

        info!("Opened DRM card {} ({})", path.display(), driver);
        Ok(Self {
            card,
            path: path.to_path_buf(),
            driver,
        })
    }

    /// Device node path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Kernel driver name
    pub fn driver(&self) -> &str {
        &self.driver
    }
}

fn handle<T: From<NonZeroU32>>(id: u32, what: &str) -> io::Result<T> {
    NonZeroU32::new(id)
        .map(T::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("null {} id", what)))
}

fn raw<T: Into<u32>>(handle: T) -> u32 {
    handle.into()
}

fn mode_name(name: &[c_char]) -> String {
    let bytes: Vec<u8> = name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn mode_info(mode: Mode) -> ModeInfo {
    let raw = drm_ffi::drm_mode_modeinfo::from(mode);
    ModeInfo {
        clock: raw.clock,
        hdisplay: raw.hdisplay,
        hsync_start: raw.hsync_start,
        hsync_end: raw.hsync_end,
        htotal: raw.htotal,
        hskew: raw.hskew,
        vdisplay: raw.vdisplay,
        vsync_start: raw.vsync_start,
        vsync_end: raw.vsync_end,
        vtotal: raw.vtotal,
        vscan: raw.vscan,
        vrefresh: raw.vrefresh,
        flags: raw.flags,
        mode_type: raw.type_,
        name: mode_name(&raw.name),
    }
}

fn kernel_mode(info: &ModeInfo) -> Mode {
    let mut name = [0 as c_char; 32];
    for (dst, &src) in name.iter_mut().zip(info.name.as_bytes().iter().take(31)) {
        *dst = src as c_char;
    }

    Mode::from(drm_ffi::drm_mode_modeinfo {
        clock: info.clock,
        hdisplay: info.hdisplay,
        hsync_start: info.hsync_start,
        hsync_end: info.hsync_end,
        htotal: info.htotal,
        hskew: info.hskew,
        vdisplay: info.vdisplay,
        vsync_start: info.vsync_start,
        vsync_end: info.vsync_end,
        vtotal: info.vtotal,
        vscan: info.vscan,
        vrefresh: info.vrefresh,
        flags: info.flags,
        type_: info.mode_type,
        name,
    })
}

/// Single-plane framebuffer description with an explicit pitch
struct Surface {
    size: (u32, u32),
    format: DrmFourcc,
    handle: buffer::Handle,
    pitch: u32,
}

impl PlanarBuffer for Surface {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format(&self) -> DrmFourcc {
        self.format
    }

    fn modifier(&self) -> Option<DrmModifier> {
        None
    }

    fn pitches(&self) -> [u32; 4] {
        [self.pitch, 0, 0, 0]
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        [Some(self.handle), None, None, None]
    }

    fn offsets(&self) -> [u32; 4] {
        [0; 4]
    }
}

impl DisplayDevice for DrmCard {
    type Mapping = MappedRegion;

    fn enable_universal_planes(&self) -> io::Result<()> {
        self.card
            .set_client_capability(ClientCapability::UniversalPlanes, true)
    }

    fn resources(&self) -> io::Result<Resources> {
        let res = self.card.resource_handles()?;
        Ok(Resources {
            crtcs: res.crtcs().iter().copied().map(raw).collect(),
            connectors: res.connectors().iter().copied().map(raw).collect(),
        })
    }

    fn connector_modes(&self, connector: u32) -> io::Result<Vec<ModeInfo>> {
        let info = self
            .card
            .get_connector(handle(connector, "connector")?, true)?;
        Ok(info.modes().iter().copied().map(mode_info).collect())
    }

    fn crtc(&self, crtc: u32) -> io::Result<CrtcState> {
        let info = self.card.get_crtc(handle(crtc, "crtc")?)?;
        Ok(CrtcState {
            id: crtc,
            framebuffer: info.framebuffer().map(raw),
            position: info.position(),
            mode: info.mode().map(mode_info),
        })
    }

    fn set_crtc(
        &self,
        crtc: u32,
        framebuffer: Option<u32>,
        position: (u32, u32),
        connectors: &[u32],
        mode: Option<&ModeInfo>,
    ) -> io::Result<()> {
        let framebuffer = framebuffer
            .map(|fb| handle::<control::framebuffer::Handle>(fb, "framebuffer"))
            .transpose()?;
        let connectors = connectors
            .iter()
            .map(|&c| handle::<control::connector::Handle>(c, "connector"))
            .collect::<io::Result<Vec<_>>>()?;

        self.card.set_crtc(
            handle(crtc, "crtc")?,
            framebuffer,
            position,
            &connectors,
            mode.map(kernel_mode),
        )
    }

    fn plane_ids(&self) -> io::Result<Vec<u32>> {
        Ok(self
            .card
            .plane_handles()?
            .into_iter()
            .map(raw)
            .collect())
    }

    fn plane(&self, plane: u32) -> io::Result<PlaneState> {
        let info = self.card.get_plane(handle(plane, "plane")?)?;

        // Rebuild the index bitmask from the filtered CRTC list.
        let res = self.card.resource_handles()?;
        let allowed = res.filter_crtcs(info.possible_crtcs());
        let possible_crtcs = res
            .crtcs()
            .iter()
            .enumerate()
            .filter(|(i, c)| *i < 32 && allowed.contains(*c))
            .fold(0u32, |mask, (i, _)| mask | (1 << i));

        Ok(PlaneState {
            id: plane,
            crtc: info.crtc().map(raw),
            framebuffer: info.framebuffer().map(raw),
            possible_crtcs,
            formats: info.formats().to_vec(),
            position: (0, 0),
        })
    }

    fn plane_properties(&self, plane: u32) -> io::Result<Vec<PropertyInfo>> {
        let set = self
            .card
            .get_properties(handle::<control::plane::Handle>(plane, "plane")?)?;
        let (ids, values) = set.as_props_and_values();

        ids.iter()
            .zip(values)
            .map(|(&id, &value)| {
                let info = self.card.get_property(id)?;
                let enums = match info.value_type() {
                    property::ValueType::Enum(table) => table
                        .values()
                        .1
                        .iter()
                        .map(|e| EnumEntry {
                            value: e.value(),
                            name: e.name().to_string_lossy().into_owned(),
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                Ok(PropertyInfo {
                    id: raw(id),
                    name: info.name().to_string_lossy().into_owned(),
                    value,
                    enums,
                })
            })
            .collect()
    }

    fn set_plane(
        &self,
        plane: u32,
        crtc: u32,
        framebuffer: Option<u32>,
        dst: Rect,
        src: Rect,
    ) -> io::Result<()> {
        let framebuffer = framebuffer
            .map(|fb| handle::<control::framebuffer::Handle>(fb, "framebuffer"))
            .transpose()?;
        let src_x = u32::try_from(src.x).unwrap_or(0);
        let src_y = u32::try_from(src.y).unwrap_or(0);

        // Source coordinates are 16.16 fixed point.
        self.card.set_plane(
            handle(plane, "plane")?,
            handle(crtc, "crtc")?,
            framebuffer,
            0,
            (dst.x, dst.y, dst.width, dst.height),
            (src_x << 16, src_y << 16, src.width << 16, src.height << 16),
        )
    }

    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> io::Result<DumbAllocation> {
        let dumb = drm_ffi::mode::dumbbuffer::create(self.card.as_fd(), width, height, bpp, 0)?;
        Ok(DumbAllocation {
            handle: dumb.handle,
            pitch: dumb.pitch,
            size: dumb.size,
        })
    }

    fn export_prime(&self, handle_id: u32) -> io::Result<OwnedFd> {
        self.card.buffer_to_prime_fd(
            handle(handle_id, "buffer")?,
            nix::libc::O_CLOEXEC as u32,
        )
    }

    fn add_framebuffer(
        &self,
        width: u32,
        height: u32,
        format: u32,
        handle_id: u32,
        pitch: u32,
    ) -> io::Result<u32> {
        let format = DrmFourcc::try_from(format)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let surface = Surface {
            size: (width, height),
            format,
            handle: handle(handle_id, "buffer")?,
            pitch,
        };
        let fb = self
            .card
            .add_planar_framebuffer(&surface, FbCmd2Flags::empty())?;
        Ok(raw(fb))
    }

    fn map_dumb(&self, handle_id: u32, size: usize) -> io::Result<MappedRegion> {
        let map = drm_ffi::mode::dumbbuffer::map(self.card.as_fd(), handle_id, 0, 0)?;
        MappedRegion::map(self.card.as_fd(), map.offset, size)
    }

    fn remove_framebuffer(&self, framebuffer: u32) -> io::Result<()> {
        self.card
            .destroy_framebuffer(handle(framebuffer, "framebuffer")?)
    }

    fn destroy_dumb(&self, handle_id: u32) -> io::Result<()> {
        drm_ffi::mode::dumbbuffer::destroy(self.card.as_fd(), handle_id)?;
        Ok(())
    }
}
