use crate::order::Station;

use super::{Principal, Role};

/// Maps a principal to the station whose work they see.
pub trait StationResolver: Send + Sync {
    /// `None` when the principal has no station (drivers).
    fn station_for(&self, principal: &Principal) -> Option<Station>;
}

/// Workers see their own station; admins see a configured fallback station.
#[derive(Debug, Clone, Copy)]
pub struct RoleStationPolicy {
    admin_station: Option<Station>,
}

impl RoleStationPolicy {
    pub fn new(admin_station: Option<Station>) -> Self {
        Self { admin_station }
    }
}

impl Default for RoleStationPolicy {
    fn default() -> Self {
        Self::new(Some(Station::first()))
    }
}

impl StationResolver for RoleStationPolicy {
    fn station_for(&self, principal: &Principal) -> Option<Station> {
        match principal.role {
            Role::Worker { station } => Some(station),
            Role::Admin => self.admin_station,
            Role::Driver => None,
        }
    }
}
