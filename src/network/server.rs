//! Game Server Runtime
//!
//! Async shell around the synchronous [`SessionManager`]. The manager sits
//! behind one tokio mutex (single writer); every client event and every
//! timer firing takes the lock, mutates, and releases it.
//!
//! Per-room timers are tokio tasks owned by one driver task:
//!
//! ```text
//!  client event ──► SessionManager ──► TimerCommand ──► driver
//!                        ▲                                │ spawn / abort
//!                        └──── countdown / battle / launch tasks
//! ```
//!
//! Tasks never spawn tasks; they forward the manager's requests to the
//! driver over a channel.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::game::combatant::PlayerId;
use crate::session::manager::{SessionConfig, SessionError, SessionManager};
use crate::session::room::RoomCode;
use crate::session::timers::TimerCommand;
use super::protocol::{ClientMessage, ServerMessage};
use super::transport::ChannelTransport;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Battle timer rate (Hz).
    pub battle_tick_hz: u32,
    /// Countdown length in ticks.
    pub countdown_secs: u8,
    /// Time between countdown ticks.
    pub countdown_interval: Duration,
    /// Delay between `match_found` and the matched room starting.
    pub match_launch_delay: Duration,
    /// Stale-room sweep period.
    pub cleanup_interval: Duration,
    /// How long ended rooms linger.
    pub ended_room_ttl: Duration,
    /// Room capacity when the client names none.
    pub default_max_players: usize,
    /// Chat message cap in characters.
    pub chat_max_len: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            battle_tick_hz: 10,
            countdown_secs: 3,
            countdown_interval: Duration::from_secs(1),
            match_launch_delay: Duration::from_millis(2000),
            cleanup_interval: Duration::from_secs(60),
            ended_room_ttl: Duration::from_secs(300),
            default_max_players: 4,
            chat_max_len: 200,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `CLASH_*` environment variables.
    pub fn from_env() -> Result<Self, GameServerError> {
        let defaults = Self::default();
        let var = |name: &str| std::env::var(name).ok();
        Ok(Self {
            battle_tick_hz: parse_setting("CLASH_BATTLE_TICK_HZ", var("CLASH_BATTLE_TICK_HZ"), defaults.battle_tick_hz)?
                .max(1),
            countdown_secs: parse_setting("CLASH_COUNTDOWN_SECS", var("CLASH_COUNTDOWN_SECS"), defaults.countdown_secs)?,
            match_launch_delay: Duration::from_millis(parse_setting(
                "CLASH_MATCH_LAUNCH_DELAY_MS",
                var("CLASH_MATCH_LAUNCH_DELAY_MS"),
                defaults.match_launch_delay.as_millis() as u64,
            )?),
            cleanup_interval: Duration::from_secs(
                parse_setting(
                    "CLASH_CLEANUP_INTERVAL_SECS",
                    var("CLASH_CLEANUP_INTERVAL_SECS"),
                    defaults.cleanup_interval.as_secs(),
                )?
                .max(1),
            ),
            ended_room_ttl: Duration::from_secs(parse_setting(
                "CLASH_ENDED_ROOM_TTL_SECS",
                var("CLASH_ENDED_ROOM_TTL_SECS"),
                defaults.ended_room_ttl.as_secs(),
            )?),
            default_max_players: parse_setting(
                "CLASH_DEFAULT_MAX_PLAYERS",
                var("CLASH_DEFAULT_MAX_PLAYERS"),
                defaults.default_max_players,
            )?,
            ..defaults
        })
    }

    /// Battle timer period.
    pub fn battle_tick(&self) -> Duration {
        Duration::from_secs(1) / self.battle_tick_hz.max(1)
    }

    /// Settings for the session layer.
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            countdown_ticks: self.countdown_secs,
            ended_room_ttl: chrono::Duration::from_std(self.ended_room_ttl).unwrap_or(defaults.ended_room_ttl),
            default_max_players: self.default_max_players,
            chat_max_len: self.chat_max_len,
            match_launch_delay: self.match_launch_delay,
        }
    }
}

fn parse_setting<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T, GameServerError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| GameServerError::InvalidConfig { name: name.to_string(), value }),
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Environment variable did not parse.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidConfig {
        /// Variable name
        name: String,
        /// Raw value
        value: String,
    },

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// SERVER
// =============================================================================

#[derive(Default)]
struct RoomTasks {
    countdown: Option<JoinHandle<()>>,
    battle: Option<JoinHandle<()>>,
    launch: Option<JoinHandle<()>>,
}

impl RoomTasks {
    fn abort_all(&mut self) {
        for handle in [self.countdown.take(), self.battle.take(), self.launch.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

/// The game server.
#[derive(Clone)]
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Session manager (single writer).
    sessions: Arc<Mutex<SessionManager>>,
    /// Outbound connections.
    transport: Arc<ChannelTransport>,
    /// Requests for the timer driver.
    timer_tx: mpsc::UnboundedSender<TimerCommand>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create the server and start its driver and cleanup tasks.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start(config: ServerConfig) -> Self {
        let transport = Arc::new(ChannelTransport::new());
        let sessions = Arc::new(Mutex::new(SessionManager::new(config.session_config(), transport.clone())));
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        let server = Self { config, sessions, transport, timer_tx, shutdown_tx };

        let driver = server.clone();
        tokio::spawn(async move {
            driver.run_timer_driver(timer_rx).await;
        });
        let cleanup = server.clone();
        tokio::spawn(async move {
            cleanup.run_cleanup_loop().await;
        });

        info!(
            version = %server.config.version,
            battle_tick_hz = server.config.battle_tick_hz,
            countdown_secs = server.config.countdown_secs,
            "Game server started"
        );
        server
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a connection. Messages for the player arrive on the
    /// returned receiver.
    #[instrument(skip(self, name, icon))]
    pub async fn connect(
        &self,
        player: PlayerId,
        name: String,
        icon: String,
    ) -> mpsc::UnboundedReceiver<ServerMessage> {
        let rx = self.transport.connect(player.clone());
        self.sessions.lock().await.register_player(player, name, icon);
        rx
    }

    /// Handle one raw text frame from a client.
    #[instrument(skip(self, text))]
    pub async fn handle_text(&self, player: &PlayerId, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle_message(player, message).await,
            Err(err) => {
                let mut sessions = self.sessions.lock().await;
                sessions.reject_malformed(player, &err.to_string());
            }
        }
    }

    /// Handle one parsed client message.
    pub async fn handle_message(&self, player: &PlayerId, message: ClientMessage) {
        let mut sessions = self.sessions.lock().await;
        // Rejections were already reported to the player
        let _ = sessions.handle(player, message);
        self.forward_timers(&mut sessions);
    }

    /// Connection closed.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, player: &PlayerId) {
        {
            let mut sessions = self.sessions.lock().await;
            sessions.disconnect(player);
            self.forward_timers(&mut sessions);
        }
        self.transport.disconnect(player);
    }

    /// Live rooms.
    pub async fn room_count(&self) -> usize {
        self.sessions.lock().await.room_count()
    }

    /// Room a player is in.
    pub async fn room_of(&self, player: &PlayerId) -> Option<RoomCode> {
        self.sessions.lock().await.room_of(player).cloned()
    }

    /// Stop the driver and cleanup tasks. Room tasks are aborted by the driver.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    fn forward_timers(&self, sessions: &mut SessionManager) {
        for command in sessions.take_timer_commands() {
            if self.timer_tx.send(command).is_err() {
                warn!("Timer driver gone, command dropped");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Background tasks
    // -------------------------------------------------------------------------

    async fn run_timer_driver(self, mut rx: mpsc::UnboundedReceiver<TimerCommand>) {
        let mut tasks: BTreeMap<RoomCode, RoomTasks> = BTreeMap::new();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                command = rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.apply_timer(&mut tasks, command);
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        for room in tasks.values_mut() {
            room.abort_all();
        }
    }

    fn apply_timer(&self, tasks: &mut BTreeMap<RoomCode, RoomTasks>, command: TimerCommand) {
        debug!(?command, "Timer command");
        match command {
            TimerCommand::StartCountdown(code) => {
                let entry = tasks.entry(code.clone()).or_default();
                if let Some(old) = entry.countdown.take() {
                    old.abort();
                }
                let server = self.clone();
                entry.countdown = Some(tokio::spawn(async move { server.run_countdown(code).await }));
            }
            TimerCommand::StartBattle(code) => {
                let entry = tasks.entry(code.clone()).or_default();
                // The battle supersedes the countdown
                if let Some(countdown) = entry.countdown.take() {
                    countdown.abort();
                }
                if let Some(old) = entry.battle.take() {
                    old.abort();
                }
                let server = self.clone();
                entry.battle = Some(tokio::spawn(async move { server.run_battle(code).await }));
            }
            TimerCommand::ScheduleLaunch(code) => {
                let entry = tasks.entry(code.clone()).or_default();
                if let Some(old) = entry.launch.take() {
                    old.abort();
                }
                let server = self.clone();
                entry.launch = Some(tokio::spawn(async move { server.run_launch(code).await }));
            }
            TimerCommand::StopBattle(code) => {
                if let Some(battle) = tasks.get_mut(&code).and_then(|t| t.battle.take()) {
                    battle.abort();
                    debug!(room = %code, "Battle timer stopped");
                }
            }
            TimerCommand::Cancel(code) => {
                if let Some(mut room) = tasks.remove(&code) {
                    room.abort_all();
                    debug!(room = %code, "Room timers cancelled");
                }
            }
        }
    }

    async fn run_countdown(self, code: RoomCode) {
        let mut ticker = interval(self.config.countdown_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let step = {
                let mut sessions = self.sessions.lock().await;
                let step = sessions.countdown_tick(&code);
                self.forward_timers(&mut sessions);
                step
            };
            if step.is_final() {
                break;
            }
        }
    }

    async fn run_battle(self, code: RoomCode) {
        let mut ticker = interval(self.config.battle_tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let running = {
                let mut sessions = self.sessions.lock().await;
                let running = sessions.battle_tick(&code);
                self.forward_timers(&mut sessions);
                running
            };
            if !running {
                debug!(room = %code, "Battle timer finished");
                break;
            }
        }
    }

    async fn run_launch(self, code: RoomCode) {
        sleep(self.config.match_launch_delay).await;
        let mut sessions = self.sessions.lock().await;
        if !sessions.launch_matched(&code) {
            debug!(room = %code, "Matched room did not launch");
        }
        self.forward_timers(&mut sessions);
    }

    async fn run_cleanup_loop(self) {
        let mut ticker = interval(self.config.cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut sessions = self.sessions.lock().await;
                    let removed = sessions.sweep_stale_rooms(Utc::now());
                    self.forward_timers(&mut sessions);
                    debug!(removed, rooms = sessions.room_count(), "Cleanup sweep");
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::ErrorCode;
    use crate::session::room::RoomState;
    use tokio::time::timeout;

    fn fast_config() -> ServerConfig {
        ServerConfig {
            battle_tick_hz: 100,
            countdown_interval: Duration::from_millis(10),
            match_launch_delay: Duration::from_millis(10),
            ..ServerConfig::default()
        }
    }

    async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<ServerMessage>, mut pred: F) -> ServerMessage
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                let message = rx.recv().await.expect("channel closed");
                if pred(&message) {
                    return message;
                }
            }
        })
        .await
        .expect("timed out waiting for message")
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.battle_tick(), Duration::from_millis(100));
        assert_eq!(config.countdown_secs, 3);
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));

        let session = config.session_config();
        assert_eq!(session.countdown_ticks, 3);
        assert_eq!(session.ended_room_ttl, chrono::Duration::minutes(5));
        assert_eq!(session.default_max_players, 4);
    }

    #[test]
    fn test_parse_setting() {
        assert_eq!(parse_setting("X", None, 7u32).unwrap(), 7);
        assert_eq!(parse_setting("X", Some(" 12 ".into()), 7u32).unwrap(), 12);
        assert!(matches!(
            parse_setting("X", Some("fast".into()), 7u32),
            Err(GameServerError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_message_reported() {
        let server = GameServer::start(fast_config());
        let player = PlayerId::new("a");
        let mut rx = server.connect(player.clone(), "Ann".into(), String::new()).await;

        server.handle_text(&player, "{\"type\":\"fly\"}").await;
        let message = wait_for(&mut rx, |_| true).await;
        assert!(matches!(message, ServerMessage::Error { code: ErrorCode::InvalidMessage, .. }));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_countdown_launches_game() {
        let server = GameServer::start(fast_config());
        let player = PlayerId::new("solo");
        let mut rx = server.connect(player.clone(), "Solo".into(), String::new()).await;

        server.handle_text(&player, r#"{"type":"create_party","mode":"creative"}"#).await;
        server.handle_text(&player, r#"{"type":"select_character","characterId":"frost"}"#).await;
        server.handle_text(&player, r#"{"type":"set_ready","ready":true}"#).await;
        server.handle_text(&player, r#"{"type":"start_game"}"#).await;

        wait_for(&mut rx, |m| matches!(m, ServerMessage::GameStarting { countdown: 3 })).await;
        // The opening turn's prompt goes out ahead of the first snapshot
        wait_for(&mut rx, |m| matches!(m, ServerMessage::RhythmStart { .. })).await;
        wait_for(&mut rx, |m| matches!(m, ServerMessage::BattleState { .. })).await;

        let code = server.room_of(&player).await.unwrap();
        let state = server.sessions.lock().await.room(&code).map(|r| r.state);
        assert_eq!(state, Some(RoomState::Active));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_matched_room_starts_after_delay() {
        let server = GameServer::start(fast_config());
        let a = PlayerId::new("a");
        let b = PlayerId::new("b");
        let mut rx_a = server.connect(a.clone(), "A".into(), String::new()).await;
        let _rx_b = server.connect(b.clone(), "B".into(), String::new()).await;

        server.handle_text(&a, r#"{"type":"queue","mode":"pve"}"#).await;
        server.handle_text(&b, r#"{"type":"queue","mode":"pve"}"#).await;

        wait_for(&mut rx_a, |m| matches!(m, ServerMessage::MatchFound { .. })).await;
        wait_for(&mut rx_a, |m| matches!(m, ServerMessage::GameStarting { countdown: 3 })).await;
        wait_for(&mut rx_a, |m| matches!(m, ServerMessage::BattleState { .. })).await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_destroys_empty_room() {
        let server = GameServer::start(fast_config());
        let player = PlayerId::new("a");
        let _rx = server.connect(player.clone(), "A".into(), String::new()).await;

        server.handle_text(&player, r#"{"type":"create_party","mode":"pve"}"#).await;
        assert_eq!(server.room_count().await, 1);
        server.disconnect(&player).await;
        assert_eq!(server.room_count().await, 0);
        server.shutdown();
    }
}
