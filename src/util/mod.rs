//! Small helpers shared by the engine and the HTTP backend.
//!
//! - **Debouncing**: [`Debouncer`] releases the latest value after a quiet period
//! - **Task panics**: [`catch_task_panic`] reports panics in spawned tasks as errors
//! - **Endpoint validation**: [`validate_api_base`] checks the backend base URL

mod debounce;
mod endpoint;
mod panic;

pub use debounce::Debouncer;
pub use endpoint::{validate_api_base, EndpointError};
pub use panic::catch_task_panic;
