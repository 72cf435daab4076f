//! Who is acting, and which station they work at.

mod policy;
mod types;

pub use policy::{RoleStationPolicy, StationResolver};
pub use types::{Principal, Role};
