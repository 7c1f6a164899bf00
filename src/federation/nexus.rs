//! Central Nexus bootstrap. The hub's district layout is fixed at
//! initialization; each district owns a contiguous sector range with its
//! own security/development/traffic bands.

use rand::Rng as _;
use rand::SeedableRng as _;
use rand_chacha::ChaCha8Rng;

use crate::models::{District, Sector, SectorIndex, SectorType, WarpLink, MAX_WARP_LINKS};

pub struct DistrictSpec {
    pub district: District,
    pub sectors: i32,
    pub security: (i32, i32),
    pub development: (i32, i32),
    pub traffic: (i32, i32),
}

pub fn district_layout() -> Vec<DistrictSpec> {
    let d = |district, sectors, security, development, traffic| DistrictSpec {
        district,
        sectors,
        security,
        development,
        traffic,
    };
    vec![
        d(District::CommerceCentral, 500, (7, 9), (8, 10), (8, 10)),
        d(District::DiplomaticQuarter, 300, (8, 10), (7, 9), (4, 7)),
        d(District::IndustrialZone, 600, (4, 7), (6, 9), (6, 9)),
        d(District::ResidentialDistrict, 800, (5, 8), (5, 8), (3, 6)),
        d(District::TransitHub, 400, (6, 8), (7, 10), (8, 10)),
        d(District::HighSecurityZone, 200, (9, 10), (8, 10), (1, 3)),
        d(District::CulturalCenter, 350, (6, 8), (6, 9), (5, 8)),
        d(District::ResearchCampus, 450, (7, 9), (8, 10), (3, 6)),
        d(District::FreeTradeZone, 600, (3, 6), (5, 8), (7, 10)),
        d(District::GatewayPlaza, 800, (6, 8), (6, 8), (8, 10)),
    ]
}

pub fn nexus_sector_count() -> i32 {
    district_layout().iter().map(|d| d.sectors).sum()
}

/// Generate the Nexus sector map: contiguous district ranges, a transit
/// spine through each district, and inter-district junctions. Gate links
/// to member regions are added when regions provision.
pub fn generate_nexus(seed: u64) -> Vec<Sector> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let layout = district_layout();
    let mut sectors: Vec<Sector> = Vec::with_capacity(nexus_sector_count() as usize);
    let mut index = 0;
    let mut district_starts = Vec::new();

    for spec in &layout {
        district_starts.push(index + 1);
        for _ in 0..spec.sectors {
            index += 1;
            sectors.push(Sector {
                index: SectorIndex(index),
                sector_type: SectorType::Normal,
                hazard_level: 0,
                radiation_level: 0,
                security_level: rng.random_range(spec.security.0..=spec.security.1),
                development_level: rng.random_range(spec.development.0..=spec.development.1),
                traffic_level: rng.random_range(spec.traffic.0..=spec.traffic.1),
                district: Some(spec.district),
                warp_links: vec![],
            });
        }
    }

    let mut add_link = |sectors: &mut Vec<Sector>, a: i32, b: i32, cost: i32| {
        if sectors[(a - 1) as usize].warp_links.len() >= MAX_WARP_LINKS
            || sectors[(b - 1) as usize].warp_links.len() >= MAX_WARP_LINKS
            || sectors[(a - 1) as usize].link_to(SectorIndex(b)).is_some()
        {
            return;
        }
        for (from, to) in [(a, b), (b, a)] {
            sectors[(from - 1) as usize].warp_links.push(WarpLink {
                to: SectorIndex(to),
                travel_cost: cost,
                toll: None,
                restriction: None,
            });
        }
    };

    // Spine within each district keeps it internally connected.
    for (d, spec) in layout.iter().enumerate() {
        let start = district_starts[d];
        for offset in 1..spec.sectors {
            add_link(&mut sectors, start + offset - 1, start + offset, 1);
        }
        // a few local shortcuts
        for _ in 0..spec.sectors / 10 {
            let a = rng.random_range(start..start + spec.sectors);
            let b = rng.random_range(start..start + spec.sectors);
            if a != b {
                add_link(&mut sectors, a, b, 1);
            }
        }
    }

    // Junctions chain the districts and route everything through the
    // transit hub.
    let transit_start = district_starts[4];
    for (d, start) in district_starts.iter().enumerate() {
        if d != 4 {
            add_link(&mut sectors, *start, transit_start + d as i32, 2);
        }
    }

    sectors
}

/// Where member-region gates land: spread across gateway-plaza.
pub fn gateway_plaza_range() -> (SectorIndex, SectorIndex) {
    let layout = district_layout();
    let before: i32 = layout[..9].iter().map(|d| d.sectors).sum();
    (
        SectorIndex(before + 1),
        SectorIndex(before + layout[9].sectors),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_layout_matches_published_table() {
        let layout = district_layout();
        assert_eq!(layout.len(), 10);
        assert_eq!(nexus_sector_count(), 5000);
        let high_sec = layout
            .iter()
            .find(|d| d.district == District::HighSecurityZone)
            .unwrap();
        assert_eq!(high_sec.sectors, 200);
        assert_eq!(high_sec.security, (9, 10));
        assert_eq!(high_sec.traffic, (1, 3));
    }

    #[test]
    fn test_nexus_generation_deterministic_and_connected() {
        let a = generate_nexus(99);
        let b = generate_nexus(99);
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
        // connectivity
        let mut seen = BTreeSet::new();
        let mut stack = vec![1];
        while let Some(i) = stack.pop() {
            if !seen.insert(i) {
                continue;
            }
            for link in &a[(i - 1) as usize].warp_links {
                stack.push(link.to.0);
            }
        }
        assert_eq!(seen.len(), a.len());
    }

    #[test]
    fn test_district_ranges_contiguous() {
        let sectors = generate_nexus(3);
        // first commerce-central, last gateway-plaza
        assert_eq!(sectors[0].district, Some(District::CommerceCentral));
        assert_eq!(sectors[499].district, Some(District::CommerceCentral));
        assert_eq!(sectors[500].district, Some(District::DiplomaticQuarter));
        assert_eq!(sectors[4999].district, Some(District::GatewayPlaza));
        let (lo, hi) = gateway_plaza_range();
        assert_eq!(lo.0, 4201);
        assert_eq!(hi.0, 5000);
    }

    #[test]
    fn test_security_bands_respected() {
        let sectors = generate_nexus(7);
        for sector in &sectors {
            if sector.district == Some(District::HighSecurityZone) {
                assert!((9..=10).contains(&sector.security_level));
            }
            if sector.district == Some(District::FreeTradeZone) {
                assert!((3..=6).contains(&sector.security_level));
            }
        }
    }
}
