use serde::{Deserialize, Serialize};

use super::SectorIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectorType {
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "nebula")]
    Nebula,
    #[serde(rename = "asteroid")]
    Asteroid,
    #[serde(rename = "ice")]
    Ice,
    #[serde(rename = "radiation")]
    Radiation,
    #[serde(rename = "void")]
    Void,
}

/// Nexus district tag; only meaningful for sectors of the central-nexus
/// region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum District {
    #[serde(rename = "commerce-central")]
    CommerceCentral,
    #[serde(rename = "diplomatic-quarter")]
    DiplomaticQuarter,
    #[serde(rename = "industrial-zone")]
    IndustrialZone,
    #[serde(rename = "residential-district")]
    ResidentialDistrict,
    #[serde(rename = "transit-hub")]
    TransitHub,
    #[serde(rename = "high-security-zone")]
    HighSecurityZone,
    #[serde(rename = "cultural-center")]
    CulturalCenter,
    #[serde(rename = "research-campus")]
    ResearchCampus,
    #[serde(rename = "free-trade-zone")]
    FreeTradeZone,
    #[serde(rename = "gateway-plaza")]
    GatewayPlaza,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sector {
    pub index: SectorIndex,
    pub sector_type: SectorType,
    pub hazard_level: i32,
    pub radiation_level: i32,
    /// 1 (lawless) ..= 10 (fortress).
    pub security_level: i32,
    pub development_level: i32,
    pub traffic_level: i32,
    pub district: Option<District>,
    pub warp_links: Vec<WarpLink>,
}

/// Directed edge out of a sector. Bidirectional links are stored once per
/// direction so tolls and restrictions can differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarpLink {
    pub to: SectorIndex,
    pub travel_cost: i32,
    pub toll: Option<i64>,
    pub restriction: Option<LinkRestriction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkRestriction {
    /// Minimum regional reputation to pass.
    MinReputation(i32),
    /// Citizens only.
    CitizensOnly,
}

pub const MAX_WARP_LINKS: usize = 8;

impl Sector {
    pub fn link_to(&self, dest: SectorIndex) -> Option<&WarpLink> {
        self.warp_links.iter().find(|l| l.to == dest)
    }

    pub fn can_add_link(&self) -> bool {
        self.warp_links.len() < MAX_WARP_LINKS
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_district_serialisation() {
        assert_eq!(
            serde_json::to_string(&District::HighSecurityZone).unwrap(),
            "\"high-security-zone\""
        );
        let d: District = serde_json::from_str("\"gateway-plaza\"").unwrap();
        assert_eq!(d, District::GatewayPlaza);
    }

    #[test]
    fn test_link_lookup() {
        let sector = Sector {
            index: SectorIndex(1),
            sector_type: SectorType::Normal,
            hazard_level: 0,
            radiation_level: 0,
            security_level: 5,
            development_level: 3,
            traffic_level: 2,
            district: None,
            warp_links: vec![WarpLink {
                to: SectorIndex(2),
                travel_cost: 3,
                toll: Some(10),
                restriction: None,
            }],
        };
        assert!(sector.link_to(SectorIndex(2)).is_some());
        assert!(sector.link_to(SectorIndex(3)).is_none());
        assert!(sector.can_add_link());
    }
}
