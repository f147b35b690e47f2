//! camview library crate.
//!
//! A webcam session controller ([`session::WebcamSession`]) driven through
//! host collaborator traits ([`platform`]), with FFmpeg-based backends for
//! device enumeration, permission checks, capture and live preview.

pub mod capture;
pub mod cli;
pub mod config;
pub mod devices;
pub mod error;
pub mod permissions;
pub mod platform;
pub mod player;
pub mod session;

pub use error::SessionError;
pub use session::{ActionGates, SessionState, WebcamSession};
