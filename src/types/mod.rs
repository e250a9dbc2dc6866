//! Type definitions

pub mod driver;
pub mod event;
pub mod geo;
pub mod messages;
pub mod order;
pub mod route;
pub mod vehicle;

pub use driver::*;
pub use event::*;
pub use geo::*;
pub use messages::*;
pub use order::*;
pub use route::*;
pub use vehicle::*;
