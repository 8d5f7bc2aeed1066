pub mod export;
pub mod import;
pub mod status;

pub use export::run_export;
pub use import::run_import;
pub use status::{run_cancel, run_reset, run_status};
