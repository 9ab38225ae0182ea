use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::serde_helpers::null_as_default;
use super::v1::{CollectionSite, Farm};
use crate::geometry::{format_coordinate_text, format_size};

/// Member id given to restored farms the server has none for.
pub const DEFAULT_MEMBER_ID: &str = "100";

/// Decimal places kept when bringing a server size into a local farm.
const RESTORED_SIZE_DECIMALS: usize = 9;

// ===== WIRE TYPES =====

/// Identity used to look up a device's records on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmRequest {
    pub device_id: String,
    pub email: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSiteRestore {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub local_cs_id: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub device_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub agent_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(deserialize_with = "null_as_default")]
    pub phone_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub village: String,
    #[serde(deserialize_with = "null_as_default")]
    pub district: String,
    #[serde(deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(deserialize_with = "null_as_default")]
    pub updated_at: String,
}

impl Default for CollectionSiteRestore {
    fn default() -> Self {
        Self {
            id: 0,
            local_cs_id: 0,
            name: String::new(),
            device_id: String::new(),
            agent_name: String::new(),
            email: String::new(),
            phone_number: String::new(),
            village: String::new(),
            district: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmRestore {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub remote_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub farmer_name: String,
    pub member_id: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub size: f64,
    pub agent_name: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub village: String,
    #[serde(deserialize_with = "null_as_default")]
    pub district: String,
    #[serde(deserialize_with = "null_as_default")]
    pub latitude: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub longitude: f64,
    pub coordinates: Option<Vec<Vec<f64>>>,
    #[serde(rename = "accuracyArray")]
    pub accuracy_array: Option<Vec<Option<f32>>>,
    #[serde(deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(deserialize_with = "null_as_default")]
    pub updated_at: String,
    #[serde(deserialize_with = "null_as_default")]
    pub site_id: u64,
}

impl Default for FarmRestore {
    fn default() -> Self {
        Self {
            id: 0,
            remote_id: String::new(),
            farmer_name: String::new(),
            member_id: None,
            size: 0.0,
            agent_name: None,
            village: String::new(),
            district: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            coordinates: None,
            accuracy_array: None,
            created_at: String::new(),
            updated_at: String::new(),
            site_id: 0,
        }
    }
}

/// One collection site and its farms, the unit the server snapshot is made of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFarmResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub device_id: String,
    pub collection_site: CollectionSiteRestore,
    #[serde(default, deserialize_with = "null_as_default")]
    pub farms: Vec<FarmRestore>,
}

// ===== CONVERSIONS =====

impl CollectionSiteRestore {
    /// Builds the local site, keyed by the server's correlation id.
    pub fn to_collection_site(&self) -> CollectionSite {
        let now = Utc::now().timestamp_millis();
        CollectionSite {
            site_id: self.local_cs_id,
            name: self.name.clone(),
            agent_name: self.agent_name.clone(),
            phone_number: self.phone_number.clone(),
            email: self.email.clone(),
            village: self.village.clone(),
            district: self.district.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_site(site: &CollectionSite, device_id: &str) -> Self {
        Self {
            id: 0,
            local_cs_id: site.site_id,
            name: site.name.clone(),
            device_id: device_id.to_string(),
            agent_name: site.agent_name.clone(),
            email: site.email.clone(),
            phone_number: site.phone_number.clone(),
            village: site.village.clone(),
            district: site.district.clone(),
            created_at: millis_to_rfc3339(site.created_at),
            updated_at: millis_to_rfc3339(site.updated_at),
        }
    }
}

impl FarmRestore {
    /// Converts a server farm into a local farm attached to `local_cs_id`.
    ///
    /// Timestamps are reset to now. An unparseable remote id is replaced by a
    /// fresh one so the farm can still be stored.
    pub fn to_farm(&self, local_cs_id: u64) -> Farm {
        let remote_id = match Uuid::parse_str(&self.remote_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    "Invalid UUID format for remote_id: {} in FarmRestore id: {}: {}",
                    self.remote_id,
                    self.id,
                    e
                );
                Uuid::new_v4()
            }
        };

        let coordinates = self.coordinates.as_ref().map(|pairs| {
            pairs
                .iter()
                .map(|pair| {
                    if pair.len() >= 2 {
                        (pair[0], pair[1])
                    } else {
                        (0.0, 0.0)
                    }
                })
                .collect::<Vec<_>>()
        });

        let now = Utc::now().timestamp_millis();
        Farm {
            id: 0,
            site_id: local_cs_id,
            remote_id,
            farmer_name: self.farmer_name.clone(),
            member_id: self
                .member_id
                .clone()
                .unwrap_or_else(|| DEFAULT_MEMBER_ID.to_string()),
            village: self.village.clone(),
            district: self.district.clone(),
            agent_name: self.agent_name.clone().unwrap_or_default(),
            size: format_size(self.size, RESTORED_SIZE_DECIMALS) as f32,
            latitude: format_coordinate_text(self.latitude),
            longitude: format_coordinate_text(self.longitude),
            coordinates,
            accuracy_array: self.accuracy_array.clone(),
            synced: false,
            scheduled_for_sync: false,
            needs_update: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_farm(farm: &Farm) -> Self {
        Self {
            id: 0,
            remote_id: farm.remote_id.to_string(),
            farmer_name: farm.farmer_name.clone(),
            member_id: Some(farm.member_id.clone()),
            size: farm.size as f64,
            agent_name: Some(farm.agent_name.clone()),
            village: farm.village.clone(),
            district: farm.district.clone(),
            latitude: farm.latitude.parse().unwrap_or(0.0),
            longitude: farm.longitude.parse().unwrap_or(0.0),
            coordinates: farm.coordinates.as_ref().map(|pairs| {
                pairs
                    .iter()
                    .map(|(first, second)| vec![*first, *second])
                    .collect()
            }),
            accuracy_array: farm.accuracy_array.clone(),
            created_at: millis_to_rfc3339(farm.created_at),
            updated_at: millis_to_rfc3339(farm.updated_at),
            site_id: farm.site_id,
        }
    }
}

fn millis_to_rfc3339(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt: DateTime<Utc>| dt.to_rfc3339())
        .unwrap_or_default()
}
