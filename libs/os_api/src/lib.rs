mod error;
mod process;
mod records;

pub use error::OsError;
pub use process::PriorityClass;
pub use records::{NumaNodeRecord, ProcessEntry, ProcessorCoreRecord};

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "linux")]
mod linux;

// Platform implementation exported under one name
#[cfg(target_os = "windows")]
pub use windows::OS;
#[cfg(target_os = "linux")]
pub use linux::OS;
