//! Chroma Clash Game Server
//!
//! Authoritative session server for Chroma Clash.
//! `--demo` runs an offline autopilot battle and verifies that a snapshot
//! restores to the same state hash.

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use chroma_clash::{
    core::hash::short_hex,
    game::{
        battle::BattleState,
        content::CharacterId,
        events::BattleEventData,
        combatant::PlayerId,
    },
    session::{
        modes::{battle_seed, initialize, Participant},
        GameMode, RoomCode,
    },
    GameServer, ServerConfig, VERSION,
};

#[cfg(feature = "debug-tracing")]
const DEFAULT_LOG_LEVEL: &str = "chroma_clash=debug,info";
#[cfg(not(feature = "debug-tracing"))]
const DEFAULT_LOG_LEVEL: &str = "info";

/// Upper bound on demo steps; a stalled battle is a bug.
const DEMO_MAX_STEPS: u32 = 10_000;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    let config = ServerConfig::from_env()?;
    info!("Chroma Clash Server v{}", VERSION);
    info!("Battle Tick: {} Hz", config.battle_tick_hz);
    info!("Countdown: {} s", config.countdown_secs);

    if std::env::args().any(|arg| arg == "--demo") {
        return demo_battle();
    }

    let server = GameServer::start(config);
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!(rooms = server.room_count().await, "Shutting down");
    server.shutdown();
    Ok(())
}

/// Run a two-player PvE battle on autopilot.
fn demo_battle() -> Result<()> {
    info!("=== Starting Demo Battle ===");

    let code = RoomCode::parse("DEMO42").context("demo room code")?;
    let nonce = [7u8; 16];
    let participants = vec![
        Participant { player: PlayerId::new("alice"), name: "Alice".into(), character: CharacterId::Ember },
        Participant { player: PlayerId::new("bob"), name: "Bob".into(), character: CharacterId::Tide },
    ];
    let seed = battle_seed(&code, &nonce, &participants);
    info!("Room: {}  Seed: {}", code, seed);

    let mut mode = initialize(GameMode::Pve, seed, &participants);
    let Some(battle) = mode.battle_mut() else {
        bail!("pve did not produce a battle");
    };
    for p in &participants {
        battle.set_autopilot(&p.player);
    }
    log_roster(battle);

    // Snapshot after the first turn opens, replay both copies in lockstep
    let snapshot = battle.snapshot().context("snapshot failed")?;
    let mut replay = BattleState::restore(&snapshot).context("restore failed")?;

    let mut steps = 0;
    while battle.outcome().is_none() {
        if !battle.auto_step() {
            bail!("battle stalled at turn {}", battle.turn);
        }
        replay.auto_step();
        steps += 1;
        if steps >= DEMO_MAX_STEPS {
            bail!("battle did not finish in {} steps", DEMO_MAX_STEPS);
        }

        for event in battle.take_events() {
            match event.data {
                BattleEventData::Reaction { kind, damage, target, .. } => {
                    info!("Turn {}: {:?} on {} for {}", event.turn, kind, target, damage);
                }
                BattleEventData::Defeated { id } => {
                    info!("Turn {}: {} defeated", event.turn, id);
                }
                BattleEventData::BattleEnded { outcome } => {
                    info!("Battle ended: {:?}", outcome);
                }
                _ => {}
            }
        }
    }

    // Print final results
    info!("=== Battle Results ===");
    info!("Steps: {}  Rounds: {}", steps, battle.round);
    let hash = battle.compute_hash();
    info!("Final State Hash: {}", hex::encode(hash));

    let rewards = battle.roll_rewards(false);
    info!("Rewards: {} gold, {} xp, loot {:?}", rewards.gold, rewards.xp, rewards.loot);
    for p in &participants {
        let stats = battle.player_stats(&p.player);
        info!("{}: {} damage dealt, {} knockouts", p.name, stats.damage_dealt, stats.knockouts);
    }

    info!("=== Verifying Determinism ===");
    let replay_hash = replay.compute_hash();
    info!("Replay State Hash: {}", short_hex(&replay_hash));
    if hash == replay_hash {
        info!("DETERMINISM VERIFIED: Hashes match!");
    } else {
        warn!("DETERMINISM FAILURE: Hashes differ!");
    }
    Ok(())
}

fn log_roster(battle: &BattleState) {
    for c in battle.party.iter().chain(battle.enemies.iter()) {
        info!(
            "{} {} (lv {}, {:?}) hp {} atk {} def {} spd {}",
            c.id, c.name, c.level, c.element, c.stats.hp, c.stats.atk, c.stats.def, c.stats.speed
        );
    }
    info!("Environment: {:?}", battle.environment);
}
