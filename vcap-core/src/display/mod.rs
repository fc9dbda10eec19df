//! KMS display output
//!
//! - [`DisplayDevice`]: kernel primitives, implemented by [`DrmCard`]
//! - [`ScanoutPool`]: dumb buffers registered as framebuffers and mapped
//! - [`Display`]: plane and mode negotiation plus per-frame commits

mod card;
mod device;
mod negotiate;
mod scanout;

pub use card::DrmCard;
pub use device::{
    CrtcState, DisplayDevice, DumbAllocation, EnumEntry, ModeInfo, PlaneState, PropertyInfo, Rect,
    Resources,
};
pub use negotiate::{
    classify_plane, enumerate_planes, find_mode, find_output, inventory, select_planes,
    ConnectorReport, Display, DisplayRequest, Inventory, Output, Plane, PlaneReport, PlaneRole,
    PlaneSelection, Presentation,
};
pub use scanout::{ScanoutBuffer, ScanoutPool};
