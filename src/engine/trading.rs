//! Price derivation and trade execution. Prices are never stored; every
//! quote is computed from the station's current inventory, the buyer's
//! faction standing, and the regional trade bonus.

use crate::error::{Error, Result};
use crate::models::{Player, RegionConfig, ReputationTier, Ship, Specialization, Station};

/// Smooth supply curve over inventory/capacity: empty stock trades at
/// 1.5x, full stock at 0.5x, linear midpoint at 1.0.
pub fn supply_factor(inventory: i64, capacity: i64) -> f64 {
    if capacity <= 0 {
        return 1.5;
    }
    let fill = (inventory as f64 / capacity as f64).clamp(0.0, 1.0);
    1.5 - fill
}

/// Regional specialization discounts its signature exports.
pub fn specialization_factor(spec: Specialization, commodity: &str) -> f64 {
    match (spec, commodity) {
        (Specialization::Mining, "ore") => 0.8,
        (Specialization::Agriculture, "food") => 0.8,
        (Specialization::Industry, "goods") => 0.85,
        (Specialization::Industry, "equipment") => 0.85,
        (Specialization::Research, "medicine") => 0.9,
        (Specialization::Commerce, _) => 0.95,
        _ => 1.0,
    }
}

fn region_bonus(config: &RegionConfig, commodity: &str) -> f64 {
    config.trade_bonuses.get(commodity).copied().unwrap_or(1.0)
}

/// Unit price a player pays (buy) at this station, floored at 1.
pub fn quote_buy(
    station: &Station,
    commodity: &str,
    tier: ReputationTier,
    config: &RegionConfig,
) -> Result<i64> {
    let entry = station
        .market_entry(commodity)
        .ok_or_else(|| Error::validation("commodity", "not traded at this station"))?;
    let price = entry.base_price as f64
        * specialization_factor(config.specialization, commodity)
        * tier.price_factor()
        * supply_factor(entry.inventory, entry.capacity)
        / region_bonus(config, commodity);
    Ok((price.round() as i64).max(1))
}

/// Unit price the station pays when the player sells; stations keep a
/// spread below their own ask.
pub fn quote_sell(
    station: &Station,
    commodity: &str,
    tier: ReputationTier,
    config: &RegionConfig,
) -> Result<i64> {
    let ask = quote_buy(station, commodity, tier, config)?;
    Ok((((ask as f64) * 0.85).floor() as i64).max(1))
}

#[derive(Debug)]
pub struct TradeReceipt {
    pub commodity: String,
    pub units: i64,
    pub price_per_unit: i64,
    pub total: i64,
}

/// Buy from the station into the ship's hold. Inventory, credits, and
/// cargo all move in the same transaction scope; the quote is computed
/// against pre-trade inventory.
pub fn execute_buy(
    player: &mut Player,
    ship: &mut Ship,
    station: &mut Station,
    commodity: &str,
    units: i64,
    config: &RegionConfig,
) -> Result<TradeReceipt> {
    if units <= 0 {
        return Err(Error::validation("units", "must be positive"));
    }
    if !station.trades() {
        return Err(Error::validation("station", "station does not trade"));
    }
    let tier = station_tier(player, station);
    let price_per_unit = quote_buy(station, commodity, tier, config)?;
    let entry = station
        .market_entry(commodity)
        .ok_or_else(|| Error::validation("commodity", "not traded at this station"))?;
    if entry.inventory < units {
        return Err(Error::validation("units", "station stock insufficient"));
    }
    let total = price_per_unit
        .checked_mul(units)
        .ok_or_else(|| Error::validation("units", "trade overflows"))?;
    // Cargo room check happens before credits so a failed trade leaves
    // both manifest and wallet untouched.
    ship.load_cargo(commodity, units)?;
    if let Err(e) = player.debit_credits(total) {
        ship.unload_cargo(commodity, units)?;
        return Err(e);
    }
    let entry = station.market.get_mut(commodity).expect("entry checked above");
    entry.inventory -= units;
    Ok(TradeReceipt {
        commodity: commodity.to_string(),
        units,
        price_per_unit,
        total,
    })
}

pub fn execute_sell(
    player: &mut Player,
    ship: &mut Ship,
    station: &mut Station,
    commodity: &str,
    units: i64,
    config: &RegionConfig,
) -> Result<TradeReceipt> {
    if units <= 0 {
        return Err(Error::validation("units", "must be positive"));
    }
    if !station.trades() {
        return Err(Error::validation("station", "station does not trade"));
    }
    let tier = station_tier(player, station);
    let price_per_unit = quote_sell(station, commodity, tier, config)?;
    let entry = station
        .market_entry(commodity)
        .ok_or_else(|| Error::validation("commodity", "not traded at this station"))?;
    if entry.inventory + units > entry.capacity {
        return Err(Error::validation("units", "station storage full"));
    }
    ship.unload_cargo(commodity, units)?;
    let total = price_per_unit * units;
    player.credit_credits(total);
    let entry = station.market.get_mut(commodity).expect("entry checked above");
    entry.inventory += units;
    Ok(TradeReceipt {
        commodity: commodity.to_string(),
        units,
        price_per_unit,
        total,
    })
}

fn station_tier(player: &Player, station: &Station) -> ReputationTier {
    match &station.faction {
        Some(faction) => ReputationTier::from_score(player.reputation_with(faction)),
        None => ReputationTier::Neutral,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{
        AccountId, HullClass, InsuranceTier, MarketEntry, PlayerId, RegionName, SectorIndex,
        Services, ShipId, StationId, StationStatus, SERVICE_FUEL, SERVICE_TRADING,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn player(credits: i64) -> Player {
        Player {
            id: PlayerId::new(),
            account_id: AccountId::new(),
            callsign: "T".to_string(),
            current_region: RegionName::nexus(),
            current_sector: SectorIndex(1),
            current_ship: None,
            credits,
            faction_reputation: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ship(capacity: i64) -> Ship {
        Ship {
            id: ShipId::new(),
            name: "S".to_string(),
            pilot: PlayerId::new(),
            shared_with_team: None,
            hull_class: HullClass::Freighter,
            sector: SectorIndex(1),
            condition: 1.0,
            shield: 0,
            max_shield: 0,
            fuel: 10,
            max_fuel: 10,
            cargo_capacity: capacity,
            cargo: BTreeMap::new(),
            insurance: InsuranceTier::None,
            modification_slots: 0,
            modifications: vec![],
            maintenance_debt: 0,
        }
    }

    fn station_with(commodity: &str, inventory: i64, capacity: i64, base: i64) -> Station {
        let mut market = BTreeMap::new();
        market.insert(
            commodity.to_string(),
            MarketEntry {
                inventory,
                capacity,
                base_price: base,
            },
        );
        Station {
            id: StationId::new(),
            name: "ST".to_string(),
            sector: SectorIndex(1),
            paired_planet: None,
            class: 4,
            services: Services(SERVICE_TRADING | SERVICE_FUEL),
            faction: None,
            owner: None,
            status: StationStatus::Operational,
            market,
        }
    }

    #[test]
    fn test_supply_factor_curve() {
        assert_eq!(supply_factor(0, 100), 1.5);
        assert_eq!(supply_factor(50, 100), 1.0);
        assert_eq!(supply_factor(100, 100), 0.5);
        assert_eq!(supply_factor(10, 0), 1.5);
    }

    #[test]
    fn test_buy_updates_everything_atomically() {
        // derived price 5: base 5, half-full stock (factor 1.0), neutral
        let mut p = player(1000);
        let mut s = ship(500);
        let mut st = station_with("fuel", 5000, 10000, 5);
        let receipt =
            execute_buy(&mut p, &mut s, &mut st, "fuel", 250, &RegionConfig::default()).unwrap();
        assert_eq!(receipt.price_per_unit, 5);
        assert_eq!(receipt.total, 1250);
        // credits cannot go negative
        assert!(p.credits >= 0);
        assert_eq!(s.cargo["fuel"], 250);
        assert_eq!(st.market["fuel"].inventory, 4750);
    }

    #[test]
    fn test_buy_beyond_capacity_rejected_without_side_effects() {
        let mut p = player(10_000);
        let mut s = ship(200);
        let mut st = station_with("fuel", 5000, 10000, 5);
        let err = execute_buy(&mut p, &mut s, &mut st, "fuel", 250, &RegionConfig::default())
            .unwrap_err();
        assert_eq!(err.code().as_str(), "VALIDATION_ERROR");
        assert_eq!(p.credits, 10_000);
        assert!(s.cargo.is_empty());
        assert_eq!(st.market["fuel"].inventory, 5000);
    }

    #[test]
    fn test_buy_without_credits_rolls_back_cargo() {
        let mut p = player(10);
        let mut s = ship(500);
        let mut st = station_with("fuel", 5000, 10000, 5);
        let err = execute_buy(&mut p, &mut s, &mut st, "fuel", 250, &RegionConfig::default())
            .unwrap_err();
        assert_eq!(err.code().as_str(), "INSUFFICIENT_CREDITS");
        assert!(s.cargo.is_empty());
        assert_eq!(st.market["fuel"].inventory, 5000);
    }

    #[test]
    fn test_price_recomputation_sees_new_inventory() {
        let cfg = RegionConfig::default();
        let mut p = player(1_000_000);
        let mut s = ship(100_000);
        let mut st = station_with("ore", 9000, 10000, 12);
        let cheap = quote_buy(&st, "ore", ReputationTier::Neutral, &cfg).unwrap();
        execute_buy(&mut p, &mut s, &mut st, "ore", 5000, &cfg).unwrap();
        let dearer = quote_buy(&st, "ore", ReputationTier::Neutral, &cfg).unwrap();
        assert!(dearer > cheap);
    }

    #[test]
    fn test_reputation_discounts() {
        let cfg = RegionConfig::default();
        let mut st = station_with("goods", 500, 1000, 25);
        st.faction = Some("helix-combine".to_string());
        let mut hero = player(0);
        hero.adjust_reputation("helix-combine", 800);
        let mut villain = player(0);
        villain.adjust_reputation("helix-combine", -800);
        let hero_price = quote_buy(
            &st,
            "goods",
            ReputationTier::from_score(hero.reputation_with("helix-combine")),
            &cfg,
        )
        .unwrap();
        let villain_price = quote_buy(
            &st,
            "goods",
            ReputationTier::from_score(villain.reputation_with("helix-combine")),
            &cfg,
        )
        .unwrap();
        assert!(hero_price < villain_price);
    }

    #[test]
    fn test_sell_respects_station_storage() {
        let mut p = player(0);
        let mut s = ship(500);
        s.load_cargo("fuel", 300).unwrap();
        let mut st = station_with("fuel", 950, 1000, 5);
        let err =
            execute_sell(&mut p, &mut s, &mut st, "fuel", 300, &RegionConfig::default()).unwrap_err();
        assert_eq!(err.code().as_str(), "VALIDATION_ERROR");
        execute_sell(&mut p, &mut s, &mut st, "fuel", 50, &RegionConfig::default()).unwrap();
        assert_eq!(st.market["fuel"].inventory, 1000);
        assert!(p.credits > 0);
    }
}
