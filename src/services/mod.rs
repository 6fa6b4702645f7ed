pub mod context;
pub mod dispatcher;
pub mod event_loop;
pub mod registry;
pub mod window_handle;

pub use context::Context;
pub use dispatcher::{CallbackInvoker, ReportedError};
pub use event_loop::translate;
pub use registry::{CallbackRegistry, Handler, HandlerResult};
pub use window_handle::Window;
