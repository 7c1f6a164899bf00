use serde::{Deserialize, Serialize};

/// Fixed faction catalog. Reputation with these governs pricing and
/// mission availability everywhere; regions weight their territory
/// differently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Faction {
    pub symbol: String,
    pub name: String,
    pub description: String,
    /// Relative presence weighting used at galaxy generation.
    pub territory_weight: f64,
    /// Symbols of factions this one is hostile toward.
    pub hostile_to: Vec<String>,
}

pub fn faction_catalog() -> Vec<Faction> {
    let f = |symbol: &str, name: &str, description: &str, weight: f64, hostile: &[&str]| Faction {
        symbol: symbol.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        territory_weight: weight,
        hostile_to: hostile.iter().map(|s| s.to_string()).collect(),
    };
    vec![
        f(
            "solar-federation",
            "Solar Federation",
            "The old core-world bureaucracy, heavy on tariffs and patrols.",
            1.0,
            &["crimson-syndicate"],
        ),
        f(
            "crimson-syndicate",
            "Crimson Syndicate",
            "Smugglers and spotters operating out of low-security sectors.",
            0.6,
            &["solar-federation", "vanguard-legion"],
        ),
        f(
            "helix-combine",
            "Helix Combine",
            "Industrial conglomerate running the big refinery stations.",
            0.9,
            &[],
        ),
        f(
            "meridian-collective",
            "Meridian Collective",
            "Agricultural co-operatives and terraforming guilds.",
            0.8,
            &[],
        ),
        f(
            "vanguard-legion",
            "Vanguard Legion",
            "Mercenary fleet selling protection by the parsec.",
            0.5,
            &["crimson-syndicate"],
        ),
        f(
            "outer-ring-compact",
            "Outer Ring Compact",
            "Frontier settlers with little patience for core-world law.",
            0.7,
            &[],
        ),
    ]
}

/// Named bands over the reputation integer, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReputationTier {
    #[serde(rename = "hated")]
    Hated,
    #[serde(rename = "hostile")]
    Hostile,
    #[serde(rename = "unfriendly")]
    Unfriendly,
    #[serde(rename = "neutral")]
    Neutral,
    #[serde(rename = "friendly")]
    Friendly,
    #[serde(rename = "honored")]
    Honored,
    #[serde(rename = "exalted")]
    Exalted,
}

impl ReputationTier {
    pub fn from_score(score: i32) -> ReputationTier {
        match score {
            i32::MIN..=-750 => ReputationTier::Hated,
            -749..=-400 => ReputationTier::Hostile,
            -399..=-100 => ReputationTier::Unfriendly,
            -99..=99 => ReputationTier::Neutral,
            100..=399 => ReputationTier::Friendly,
            400..=749 => ReputationTier::Honored,
            750..=i32::MAX => ReputationTier::Exalted,
        }
    }

    /// Price multiplier at faction-affiliated stations.
    pub fn price_factor(&self) -> f64 {
        match self {
            ReputationTier::Hated => 1.5,
            ReputationTier::Hostile => 1.3,
            ReputationTier::Unfriendly => 1.15,
            ReputationTier::Neutral => 1.0,
            ReputationTier::Friendly => 0.95,
            ReputationTier::Honored => 0.9,
            ReputationTier::Exalted => 0.85,
        }
    }

    /// Minimum tier gating faction missions.
    pub fn allows_missions(&self) -> bool {
        matches!(
            self,
            ReputationTier::Neutral
                | ReputationTier::Friendly
                | ReputationTier::Honored
                | ReputationTier::Exalted
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_catalog_size_and_uniqueness() {
        let catalog = faction_catalog();
        assert!(catalog.len() >= 6);
        let mut symbols: Vec<_> = catalog.iter().map(|f| f.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        assert_eq!(symbols.len(), catalog.len());
    }

    #[test]
    fn test_hostility_references_exist() {
        let catalog = faction_catalog();
        for faction in &catalog {
            for hostile in &faction.hostile_to {
                assert!(catalog.iter().any(|f| &f.symbol == hostile));
            }
        }
    }

    #[test]
    fn test_tier_bands() {
        assert_eq!(ReputationTier::from_score(-1000), ReputationTier::Hated);
        assert_eq!(ReputationTier::from_score(-100), ReputationTier::Unfriendly);
        assert_eq!(ReputationTier::from_score(0), ReputationTier::Neutral);
        assert_eq!(ReputationTier::from_score(100), ReputationTier::Friendly);
        assert_eq!(ReputationTier::from_score(1000), ReputationTier::Exalted);
    }

    #[test]
    fn test_price_factor_monotonic() {
        let tiers = [
            ReputationTier::Hated,
            ReputationTier::Hostile,
            ReputationTier::Unfriendly,
            ReputationTier::Neutral,
            ReputationTier::Friendly,
            ReputationTier::Honored,
            ReputationTier::Exalted,
        ];
        for pair in tiers.windows(2) {
            assert!(pair[0].price_factor() >= pair[1].price_factor());
        }
    }
}
