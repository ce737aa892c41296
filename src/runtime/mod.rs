pub mod process;
pub mod signal;

pub use process::{run_subprocess, RuntimeInvocation};
pub use signal::Signal;
