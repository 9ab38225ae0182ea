use chrono::Utc;
use native_db::{native_db, ToKey};
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::serde_helpers;

/// Latitude/longitude text stored when a farm has no known location.
pub const UNKNOWN_COORDINATE: &str = "0.0";

// ===== FARM =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 1, version = 1)]
#[native_db]
pub struct Farm {
    /// Local row id. Zero until the store assigns one.
    #[primary_key]
    pub id: u64,
    #[secondary_key]
    pub site_id: u64,
    pub remote_id: Uuid,
    pub farmer_name: String,
    pub member_id: String,
    pub village: String,
    pub district: String,
    pub agent_name: String,
    pub size: f32,
    pub latitude: String,
    pub longitude: String,
    /// Boundary pairs, persisted as JSON text.
    #[serde(with = "serde_helpers::coordinate_text")]
    pub coordinates: Option<Vec<(f64, f64)>>,
    pub accuracy_array: Option<Vec<Option<f32>>>,
    pub synced: bool,
    pub scheduled_for_sync: bool,
    pub needs_update: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Default for Farm {
    fn default() -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: 0,
            site_id: 0,
            remote_id: Uuid::new_v4(),
            farmer_name: String::new(),
            member_id: String::new(),
            village: String::new(),
            district: String::new(),
            agent_name: String::new(),
            size: 0.0,
            latitude: UNKNOWN_COORDINATE.to_string(),
            longitude: UNKNOWN_COORDINATE.to_string(),
            coordinates: None,
            accuracy_array: None,
            synced: false,
            scheduled_for_sync: false,
            needs_update: false,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Farm {
    pub fn new(site_id: u64, remote_id: Uuid, farmer_name: String) -> Self {
        Self {
            site_id,
            remote_id,
            farmer_name,
            ..Default::default()
        }
    }

    /// A farm missing its size or location is waiting for a field visit.
    pub fn is_incomplete(&self) -> bool {
        self.size == 0.0
            || self.latitude == UNKNOWN_COORDINATE
            || self.longitude == UNKNOWN_COORDINATE
    }

    /// True when any of the plot measurements differ from `other`.
    ///
    /// An accuracy list with no readings equals a missing one, and a single
    /// point at the farm's own location equals no boundary.
    pub fn differs_materially(&self, other: &Farm) -> bool {
        self.size != other.size
            || self.latitude != other.latitude
            || self.longitude != other.longitude
            || self.boundary() != other.boundary()
            || self.accuracy_readings() != other.accuracy_readings()
    }

    /// Captured coordinates, `None` when they add nothing to the lat/lon text.
    pub fn boundary(&self) -> Option<&[(f64, f64)]> {
        match self.coordinates.as_deref() {
            None | Some([]) => None,
            Some([point]) if Some(*point) == self.location() => None,
            Some(pairs) => Some(pairs),
        }
    }

    fn location(&self) -> Option<(f64, f64)> {
        let latitude = self.latitude.parse().ok()?;
        let longitude = self.longitude.parse().ok()?;
        Some((latitude, longitude))
    }

    fn accuracy_readings(&self) -> Option<&[Option<f32>]> {
        self.accuracy_array
            .as_deref()
            .filter(|readings| readings.iter().any(Option::is_some))
    }

    /// Whether the farm carries a captured boundary rather than a single point.
    pub fn has_polygon(&self) -> bool {
        self.coordinates
            .as_ref()
            .map(|coordinates| coordinates.len() > 1)
            .unwrap_or(false)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp_millis();
    }
}

// ===== COLLECTION SITE =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 2, version = 1)]
#[native_db]
pub struct CollectionSite {
    /// Local site id, also the correlation id used by server snapshots.
    #[primary_key]
    pub site_id: u64,
    pub name: String,
    pub agent_name: String,
    pub phone_number: String,
    pub email: String,
    pub village: String,
    pub district: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Default for CollectionSite {
    fn default() -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            site_id: 0,
            name: String::new(),
            agent_name: String::new(),
            phone_number: String::new(),
            email: String::new(),
            village: String::new(),
            district: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl CollectionSite {
    pub fn new(name: String, agent_name: String, village: String, district: String) -> Self {
        Self {
            name,
            agent_name,
            village,
            district,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_farm_is_incomplete() {
        let farm = Farm::default();
        assert!(farm.is_incomplete());
        assert_eq!(farm.latitude, "0.0");
        assert!(!farm.needs_update);
    }

    #[test]
    fn test_complete_farm() {
        let mut farm = Farm::new(1, Uuid::new_v4(), "Amina".to_string());
        farm.size = 12.5;
        farm.latitude = "1.23".to_string();
        farm.longitude = "4.56".to_string();
        assert!(!farm.is_incomplete());
    }

    #[test]
    fn test_differs_materially_ignores_flags() {
        let farm = Farm::new(1, Uuid::new_v4(), "Amina".to_string());
        let mut other = farm.clone();
        other.needs_update = true;
        other.synced = true;
        other.farmer_name = "Renamed".to_string();
        assert!(!farm.differs_materially(&other));

        other.coordinates = Some(vec![(1.0, 2.0)]);
        assert!(farm.differs_materially(&other));
    }

    #[test]
    fn test_empty_readings_and_own_point_are_not_changes() {
        let mut farm = Farm::new(1, Uuid::new_v4(), "Amina".to_string());
        farm.size = 2.0;
        farm.latitude = "1.5".to_string();
        farm.longitude = "36.5".to_string();

        let mut other = farm.clone();
        other.accuracy_array = Some(vec![None]);
        other.coordinates = Some(vec![(1.5, 36.5)]);
        assert!(!farm.differs_materially(&other));
        assert_eq!(other.boundary(), None);

        other.accuracy_array = Some(vec![]);
        other.coordinates = Some(vec![]);
        assert!(!farm.differs_materially(&other));

        other.accuracy_array = Some(vec![Some(4.0)]);
        assert!(farm.differs_materially(&other));

        other.accuracy_array = None;
        other.coordinates = Some(vec![(1.6, 36.5)]);
        assert!(farm.differs_materially(&other));
    }
}
