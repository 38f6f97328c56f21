pub mod device;
pub mod error;
pub mod fs;
pub mod layout;
pub mod path;

pub use device::*;
pub use error::*;
pub use fs::*;
pub use layout::*;
