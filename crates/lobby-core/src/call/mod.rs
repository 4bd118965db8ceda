//! Call domain: derived lifecycle state and the call platform seam.

pub mod platform;
pub mod state;

pub use platform::{
    CallPlatform, CallRoom, CallRoomEvent, JoinOptions, MediaPermissions, TrackKind,
};
pub use state::{CallIntent, CallState, derive_call_state};
