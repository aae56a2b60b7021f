pub mod catalog;
pub mod curriculum;
pub mod progress;
pub mod users;

pub use catalog::*;
pub use curriculum::*;
pub use progress::*;
pub use users::*;
