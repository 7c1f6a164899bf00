//! Round resolution for ship combat. Everything here is a pure function
//! of the combat aggregate and the submitted commands; the roll stream is
//! seeded from (combat id, round) so a round replays identically.

use chrono::{DateTime, Utc};
use rand::Rng as _;
use rand::SeedableRng as _;
use rand_chacha::ChaCha8Rng;

use crate::models::{
    Combat, CombatCommand, CombatRound, CombatState, Combatant, HullClass, ShipId, WeaponMix,
};

pub const DEFAULT_ROUND_CAP: u32 = 25;
pub const DEFAULT_ROUND_DEADLINE_SECS: u32 = 5;

fn round_rng(combat: &Combat, round: u32) -> ChaCha8Rng {
    let mut seed = [0u8; 32];
    seed[..16].copy_from_slice(combat.id.0.as_bytes());
    seed[16..20].copy_from_slice(&round.to_be_bytes());
    ChaCha8Rng::from_seed(seed)
}

/// initiative = hull-class base x condition x roll in [0.8, 1.2].
/// Rolls are drawn in ship-id order so both sides read a stable stream.
fn initiative(rng_roll: f64, hull_class: HullClass, condition: f64) -> f64 {
    hull_class.initiative_base() * condition.max(0.0) * rng_roll
}

fn attack_power(rng: &mut ChaCha8Rng, hull_class: HullClass, mix: WeaponMix, condition: f64) -> i32 {
    let base = match hull_class {
        HullClass::Scout => 8,
        HullClass::Shuttle => 6,
        HullClass::Freighter => 10,
        HullClass::Corvette => 18,
        HullClass::Frigate => 26,
        HullClass::Cruiser => 40,
        HullClass::Dreadnought => 60,
    } as f64;
    let mix_factor = match mix {
        WeaponMix::Balanced => 1.0,
        WeaponMix::AlphaStrike => 1.4,
        WeaponMix::Defensive => 0.6,
    };
    let spread = rng.random_range(0.85..=1.15);
    (base * mix_factor * condition.max(0.0) * spread).round() as i32
}

/// Defensive posture banks retreat progress; drifting ships escape when
/// their accumulated score beats the pursuer's initiative this round.
fn retreat_gain(mix: WeaponMix) -> f64 {
    match mix {
        WeaponMix::Defensive => 3.0,
        WeaponMix::Balanced => 2.0,
        WeaponMix::AlphaStrike => 0.5,
    }
}

struct SideState {
    ship: ShipId,
    hull_class: HullClass,
    command: CombatCommand,
}

/// Ties break to the numerically lower ship id, then the earlier joiner.
fn order_sides(
    a: (&Combatant, f64),
    b: (&Combatant, f64),
) -> bool {
    let (ca, ia) = a;
    let (cb, ib) = b;
    if ia != ib {
        return ia > ib;
    }
    if ca.ship != cb.ship {
        return ca.ship < cb.ship;
    }
    ca.joined_at <= cb.joined_at
}

pub struct RoundOutcome {
    pub round: CombatRound,
    pub terminal: Option<CombatState>,
}

/// Resolve one round. `attacker_cmd`/`defender_cmd` are `None` when the
/// side missed the deadline; the prior command (or the default) stands in.
pub fn resolve_round(
    combat: &mut Combat,
    attacker_hull: HullClass,
    defender_hull: HullClass,
    attacker_cmd: Option<CombatCommand>,
    defender_cmd: Option<CombatCommand>,
    now: DateTime<Utc>,
) -> crate::error::Result<RoundOutcome> {
    let round_no = combat.rounds.len() as u32 + 1;
    let mut rng = round_rng(combat, round_no);

    let attacker_cmd = attacker_cmd
        .or_else(|| combat.attacker.last_command.clone())
        .unwrap_or_default();
    let defender_cmd = defender_cmd
        .or_else(|| combat.defender.last_command.clone())
        .unwrap_or_default();

    // Stable draw order: roll per ship sorted by ship id.
    let mut roll_a = rng.random_range(0.8..=1.2);
    let mut roll_b = rng.random_range(0.8..=1.2);
    if combat.defender.ship < combat.attacker.ship {
        std::mem::swap(&mut roll_a, &mut roll_b);
    }
    let init_a = initiative(roll_a, attacker_hull, combat.attacker.hull_remaining);
    let init_b = initiative(roll_b, defender_hull, combat.defender.hull_remaining);

    let mut damage_dealt: Vec<(ShipId, i32)> = vec![];
    let mut drones_lost: Vec<(ShipId, i32)> = vec![];
    let mut retreat_attempted: Vec<ShipId> = vec![];
    let mut terminal: Option<CombatState> = None;

    // Drone pools clash first; losses are symmetric up to the smaller
    // committed pool.
    if attacker_cmd.drones_attack || defender_cmd.drones_attack {
        let committed_a = if attacker_cmd.drones_attack { combat.attacker.drones } else { 0 };
        let committed_b = if defender_cmd.drones_attack { combat.defender.drones } else { 0 };
        let clash = committed_a.min(committed_b);
        if clash > 0 {
            combat.attacker.drones -= clash;
            combat.defender.drones -= clash;
            drones_lost.push((combat.attacker.ship, clash));
            drones_lost.push((combat.defender.ship, clash));
        }
    }

    // Retreat bookkeeping before damage; escape is checked against the
    // pursuer's initiative in the same round.
    if attacker_cmd.attempt_retreat {
        combat.attacker.retreat_score += retreat_gain(attacker_cmd.weapon_mix);
        retreat_attempted.push(combat.attacker.ship);
    }
    if defender_cmd.attempt_retreat {
        combat.defender.retreat_score += retreat_gain(defender_cmd.weapon_mix);
        retreat_attempted.push(combat.defender.ship);
    }

    let attacker_first = order_sides(
        (&combat.attacker, init_a),
        (&combat.defender, init_b),
    );
    let initiative_order = if attacker_first {
        vec![combat.attacker.ship, combat.defender.ship]
    } else {
        vec![combat.defender.ship, combat.attacker.ship]
    };

    // Damage in initiative order; returns true when the target is
    // destroyed. A retreating side holds fire.
    let mut act = |rng: &mut ChaCha8Rng,
                   side: &SideState,
                   target: &mut Combatant,
                   target_hull: HullClass|
     -> bool {
        if side.command.attempt_retreat {
            return false;
        }
        let damage = attack_power(rng, side.hull_class, side.command.weapon_mix, 1.0);
        let absorbed = damage.min(target.shield_remaining);
        target.shield_remaining -= absorbed;
        let hull_damage = damage - absorbed;
        if hull_damage > 0 {
            let max_hull = target_hull.base_hull_points() as f64;
            target.hull_remaining = (target.hull_remaining - hull_damage as f64 / max_hull).max(0.0);
        }
        damage_dealt.push((side.ship, damage));
        target.hull_remaining <= 0.0
    };

    let order: Vec<bool> = if attacker_first {
        vec![true, false]
    } else {
        vec![false, true]
    };
    for is_attacker in order {
        if terminal.is_some() {
            break;
        }
        let (side, target, target_hull, win_state) = if is_attacker {
            (
                SideState {
                    ship: combat.attacker.ship,
                    hull_class: attacker_hull,
                    command: attacker_cmd.clone(),
                },
                &mut combat.defender,
                defender_hull,
                // the engaging side killing the defender is a victory;
                // the reverse is the attacker's defeat
                CombatState::Victory,
            )
        } else {
            (
                SideState {
                    ship: combat.defender.ship,
                    hull_class: defender_hull,
                    command: defender_cmd.clone(),
                },
                &mut combat.attacker,
                attacker_hull,
                CombatState::Defeat,
            )
        };
        if act(&mut rng, &side, target, target_hull) {
            terminal = Some(win_state);
        }
    }

    // Escape checks after damage: a dead ship cannot retreat.
    if terminal.is_none() {
        if attacker_cmd.attempt_retreat
            && combat.attacker.hull_remaining > 0.0
            && combat.attacker.retreat_score > init_b
        {
            terminal = Some(CombatState::Retreat);
        } else if defender_cmd.attempt_retreat
            && combat.defender.hull_remaining > 0.0
            && combat.defender.retreat_score > init_a
        {
            terminal = Some(CombatState::Retreat);
        }
    }

    if terminal.is_none() && round_no >= combat.round_cap {
        terminal = Some(CombatState::Draw);
    }

    combat.attacker.last_command = Some(attacker_cmd);
    combat.defender.last_command = Some(defender_cmd);

    let round = CombatRound {
        round: round_no,
        initiative_order,
        damage_dealt,
        drones_lost,
        retreat_attempted,
        resolved_at: now,
    };
    combat.push_round(round.clone())?;
    if let Some(state) = terminal {
        combat.finish(state, now)?;
    } else {
        combat.state = CombatState::Resolving;
    }
    Ok(RoundOutcome { round, terminal })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{CombatId, SectorIndex};

    fn combatant(ship: ShipId, drones: i32) -> Combatant {
        Combatant {
            ship,
            joined_at: Utc::now(),
            hull_remaining: 1.0,
            shield_remaining: 40,
            drones,
            retreat_score: 0.0,
            last_command: None,
        }
    }

    fn fixed_combat(cap: u32) -> Combat {
        let now = Utc::now();
        Combat {
            id: CombatId(uuid::Uuid::from_u128(0x1234_5678_9abc_def0)),
            sector: SectorIndex(7),
            state: CombatState::Engaging,
            attacker: combatant(ShipId(uuid::Uuid::from_u128(1)), 5),
            defender: combatant(ShipId(uuid::Uuid::from_u128(2)), 3),
            round_cap: cap,
            round_deadline_secs: DEFAULT_ROUND_DEADLINE_SECS,
            rounds: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn aggressive() -> CombatCommand {
        CombatCommand {
            target: None,
            weapon_mix: WeaponMix::AlphaStrike,
            drones_attack: true,
            attempt_retreat: false,
        }
    }

    #[test]
    fn test_round_resolution_is_deterministic() {
        let now = Utc::now();
        let mut a = fixed_combat(25);
        let mut b = fixed_combat(25);
        resolve_round(
            &mut a,
            HullClass::Frigate,
            HullClass::Corvette,
            Some(aggressive()),
            Some(aggressive()),
            now,
        )
        .unwrap();
        resolve_round(
            &mut b,
            HullClass::Frigate,
            HullClass::Corvette,
            Some(aggressive()),
            Some(aggressive()),
            now,
        )
        .unwrap();
        assert_eq!(a.rounds[0].damage_dealt, b.rounds[0].damage_dealt);
        assert_eq!(a.rounds[0].initiative_order, b.rounds[0].initiative_order);
        assert_eq!(a.attacker.hull_remaining, b.attacker.hull_remaining);
    }

    #[test]
    fn test_drone_pools_clash_first() {
        let mut combat = fixed_combat(25);
        resolve_round(
            &mut combat,
            HullClass::Frigate,
            HullClass::Frigate,
            Some(aggressive()),
            Some(aggressive()),
            Utc::now(),
        )
        .unwrap();
        // smaller pool (3) is annihilated, larger keeps the difference
        assert_eq!(combat.attacker.drones, 2);
        assert_eq!(combat.defender.drones, 0);
        assert_eq!(combat.rounds[0].drones_lost.len(), 2);
    }

    #[test]
    fn test_combat_reaches_terminal_state() {
        let mut combat = fixed_combat(25);
        let mut guard = 0;
        while !combat.state.is_terminal() {
            resolve_round(
                &mut combat,
                HullClass::Frigate,
                HullClass::Shuttle,
                Some(aggressive()),
                Some(aggressive()),
                Utc::now(),
            )
            .unwrap();
            guard += 1;
            assert!(guard <= 25, "combat failed to terminate");
        }
        // frigate vs shuttle: the shuttle dies before the cap
        assert_eq!(combat.state, CombatState::Victory);
        assert!(combat.defender.hull_remaining <= 0.0);
        // round log is monotonically numbered
        for (i, round) in combat.rounds.iter().enumerate() {
            assert_eq!(round.round as usize, i + 1);
        }
    }

    #[test]
    fn test_round_cap_draws() {
        let mut combat = fixed_combat(2);
        let passive = CombatCommand {
            target: None,
            weapon_mix: WeaponMix::Defensive,
            drones_attack: false,
            attempt_retreat: false,
        };
        resolve_round(
            &mut combat,
            HullClass::Dreadnought,
            HullClass::Dreadnought,
            Some(passive.clone()),
            Some(passive.clone()),
            Utc::now(),
        )
        .unwrap();
        assert!(!combat.state.is_terminal());
        resolve_round(
            &mut combat,
            HullClass::Dreadnought,
            HullClass::Dreadnought,
            Some(passive.clone()),
            Some(passive),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(combat.state, CombatState::Draw);
    }

    #[test]
    fn test_retreat_escapes_eventually() {
        let mut combat = fixed_combat(25);
        let fleeing = CombatCommand {
            target: None,
            weapon_mix: WeaponMix::Defensive,
            drones_attack: false,
            attempt_retreat: true,
        };
        let mut guard = 0;
        while !combat.state.is_terminal() {
            resolve_round(
                &mut combat,
                // scout flees a dreadnought: low pursuer initiative
                HullClass::Scout,
                HullClass::Dreadnought,
                Some(fleeing.clone()),
                Some(CombatCommand {
                    weapon_mix: WeaponMix::Defensive,
                    ..Default::default()
                }),
                Utc::now(),
            )
            .unwrap();
            guard += 1;
            assert!(guard <= 25);
        }
        assert!(
            combat.state == CombatState::Retreat || combat.state == CombatState::Defeat,
            "unexpected terminal {:?}",
            combat.state
        );
    }

    #[test]
    fn test_missing_command_falls_back_to_prior() {
        let now = Utc::now();
        let mut combat = fixed_combat(25);
        resolve_round(
            &mut combat,
            HullClass::Frigate,
            HullClass::Frigate,
            Some(aggressive()),
            Some(aggressive()),
            now,
        )
        .unwrap();
        // both sides time out; prior commands stand in
        resolve_round(
            &mut combat,
            HullClass::Frigate,
            HullClass::Frigate,
            None,
            None,
            now,
        )
        .unwrap();
        assert_eq!(
            combat.attacker.last_command.as_ref().unwrap().weapon_mix,
            WeaponMix::AlphaStrike
        );
        assert_eq!(combat.rounds.len(), 2);
    }
}
