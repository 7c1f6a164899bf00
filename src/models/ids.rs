use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> $name {
                $name(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(AccountId);
uuid_id!(PlayerId);
uuid_id!(ShipId);
uuid_id!(PlanetId);
uuid_id!(StationId);
uuid_id!(DroneId);
uuid_id!(DeploymentId);
uuid_id!(CombatId);
uuid_id!(ContractId);
uuid_id!(TeamId);
uuid_id!(MessageId);
uuid_id!(TreatyId);
uuid_id!(PolicyId);
uuid_id!(ElectionId);
uuid_id!(TravelId);
uuid_id!(SessionId);

/// Region shard name: lowercase alphanumerics and dashes, 3..=40 chars.
/// Doubles as the schema-name component for the region's database shard,
/// hence the strict charset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RegionName(pub String);

pub const CENTRAL_NEXUS: &str = "central-nexus";

impl RegionName {
    pub fn new(s: &str) -> Option<RegionName> {
        let ok_len = (3..=40).contains(&s.len());
        let ok_chars = s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        let ok_edges = !s.starts_with('-') && !s.ends_with('-');
        if ok_len && ok_chars && ok_edges {
            Some(RegionName(s.to_string()))
        } else {
            None
        }
    }

    pub fn nexus() -> RegionName {
        RegionName(CENTRAL_NEXUS.to_string())
    }

    pub fn is_nexus(&self) -> bool {
        self.0 == CENTRAL_NEXUS
    }

    /// Postgres schema name for this region's shard.
    pub fn schema_name(&self) -> String {
        format!("region_{}", self.0.replace('-', "_"))
    }
}

impl<'de> Deserialize<'de> for RegionName {
    fn deserialize<D>(deserializer: D) -> Result<RegionName, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RegionName::new(&s).ok_or_else(|| serde::de::Error::custom("Invalid region name"))
    }
}

impl std::fmt::Display for RegionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sector index, unique within its region.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SectorIndex(pub i32);

impl std::fmt::Display for SectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_region_name_validation() {
        assert!(RegionName::new("mining-co").is_some());
        assert!(RegionName::new("central-nexus").is_some());
        assert!(RegionName::new("ab").is_none());
        assert!(RegionName::new("Has-Caps").is_none());
        assert!(RegionName::new("-edge").is_none());
        assert!(RegionName::new("edge-").is_none());
        assert!(RegionName::new("under_score").is_none());
    }

    #[test]
    fn test_region_name_deserialize() {
        let name: RegionName = serde_json::from_str("\"mining-co\"").unwrap();
        assert_eq!(name, RegionName("mining-co".to_string()));
        assert!(serde_json::from_str::<RegionName>("\"!bad!\"").is_err());
    }

    #[test]
    fn test_schema_name() {
        let name = RegionName::new("mining-co").unwrap();
        assert_eq!(name.schema_name(), "region_mining_co");
    }
}
