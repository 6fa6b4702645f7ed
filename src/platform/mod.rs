//! Platform bindings: the window-and-display subsystem the crate talks to.
//!
//! `x11` is the real binding; `headless` is an in-memory server used for dry
//! runs and tests. Both are reached through [`create_platform`].

pub mod headless;
mod r#trait;
#[cfg(feature = "x11")]
pub mod x11;

pub use self::headless::{HeadlessOptions, HeadlessPlatform, HeadlessServer};
pub use self::r#trait::{create_platform, ContextId, NativeConnection, PixelFormat, Platform};
