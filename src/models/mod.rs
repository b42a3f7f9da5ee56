pub mod target;
pub mod raw_result;
pub mod device;
pub mod source;
pub mod evaluation;
pub mod ranking;
pub mod schedule;

pub use target::*;
pub use raw_result::*;
pub use device::*;
pub use source::*;
pub use evaluation::*;
pub use ranking::*;
pub use schedule::*;
