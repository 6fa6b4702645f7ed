//! Native X11 windows with a background event loop per window and handler
//! delivery on a dedicated callback thread.
//!
//! Start from [`Context`]: it creates [`Window`]s, keeps the handler registry
//! and owns the callback thread. A headless platform stands in for the X
//! server in dry runs and tests.

pub mod config;
pub mod error;
pub mod events;
pub mod mappings;
pub mod platform;
pub mod services;
pub mod utils;

pub use error::{MgError, Result};
pub use events::{DisplayMode, Event, EventKind, Key, LoopState, WindowArea, WindowId, WindowState};
pub use services::{Context, Handler, HandlerResult, ReportedError, Window};
