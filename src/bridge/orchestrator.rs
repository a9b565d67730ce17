//! Bridge orchestrator that ties Discord and IRC together.
//!
//! Every inbound message goes through [`Bridge::submit`]: mapping lookup,
//! mutator pipeline, delivery, command dispatch, then statistics. Submit is
//! synchronous and called from both piers at once, so nothing in here holds
//! a lock while a pier is sending.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::mapping::ChannelMappingManager;
use crate::command::{Command, CommandDispatcher};
use crate::common::error::BridgeError;
use crate::common::{Message, Platform};
use crate::config::types::BridgeConfig;
use crate::mutator::{Mutator, MutatorPipeline};
use crate::pier::{BridgeHandle, Pier};
use crate::stats::{JsonFileStore, StatisticsStore, StatisticsTracker};

/// How long shutdown waits for submits that are already running.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Stopped,
    Starting,
    Running,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::Stopped => f.write_str("stopped"),
            BridgeState::Starting => f.write_str("starting"),
            BridgeState::Running => f.write_str("running"),
        }
    }
}

/// Admits `submit` calls and lets shutdown wait until the admitted ones
/// have finished.
///
/// The top bit marks the gate closed, the rest counts submits in flight.
/// Both live in one atomic, so a submit is either admitted before the
/// gate closes (and waited for) or turned away.
struct SubmitGate {
    state: AtomicUsize,
    idle: Notify,
}

const GATE_CLOSED: usize = 1 << (usize::BITS - 1);

impl SubmitGate {
    fn closed() -> Self {
        Self {
            state: AtomicUsize::new(GATE_CLOSED),
            idle: Notify::new(),
        }
    }

    fn open(&self) {
        self.state.fetch_and(!GATE_CLOSED, Ordering::SeqCst);
    }

    fn close(&self) {
        self.state.fetch_or(GATE_CLOSED, Ordering::SeqCst);
    }

    fn enter(&self) -> Option<InFlight<'_>> {
        let previous = self.state.fetch_add(1, Ordering::SeqCst);
        let admitted = InFlight(self);
        (previous & GATE_CLOSED == 0).then_some(admitted)
    }

    /// Wait until the gate is closed and nothing is in flight.
    async fn drained(&self) {
        loop {
            let idle = self.idle.notified();
            if self.state.load(Ordering::SeqCst) == GATE_CLOSED {
                return;
            }
            idle.await;
        }
    }
}

/// One admitted submit. Leaving wakes a waiting shutdown.
struct InFlight<'a>(&'a SubmitGate);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.0.state.fetch_sub(1, Ordering::SeqCst) == GATE_CLOSED + 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// One Discord <-> IRC bridge.
pub struct Bridge {
    name: String,
    mappings: ChannelMappingManager,
    mutators: MutatorPipeline,
    commands: CommandDispatcher,
    statistics: StatisticsTracker,
    store: Box<dyn StatisticsStore>,
    discord: Arc<dyn Pier>,
    irc: Arc<dyn Pier>,
    state: watch::Sender<BridgeState>,
    gate: SubmitGate,
    /// Serializes start and shutdown.
    lifecycle: Mutex<()>,
    span: Span,
}

impl Bridge {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    pub fn statistics(&self) -> &StatisticsTracker {
        &self.statistics
    }

    fn pier(&self, platform: Platform) -> &dyn Pier {
        match platform {
            Platform::Discord => self.discord.as_ref(),
            Platform::Irc => self.irc.as_ref(),
        }
    }

    /// Route one inbound message.
    ///
    /// Never fails: anything that goes wrong is logged and the message is
    /// discarded, so the calling pier can keep its connection up.
    pub fn submit(&self, message: Message) {
        let _entered = self.span.enter();

        let Some(_in_flight) = self.gate.enter() else {
            debug!(source = %message.source(), "Bridge is stopped, dropping message");
            return;
        };

        let Some(target) = self.mappings.resolve_target(message.source()) else {
            debug!(source = %message.source(), "No channel mapping, discarding message");
            return;
        };

        let Some(message) = self.mutators.apply(message) else {
            return;
        };

        let source = message.source();
        if message.destinations().is_empty() {
            debug!(%source, "No destinations left, nothing to deliver");
        }
        for platform in message.destinations().iter() {
            // Re-targeting the origin platform means the origin channel.
            let channel = if platform == source.platform {
                source.channel.as_str()
            } else {
                target
            };

            if let Err(e) = self.pier(platform).send_message(channel, &message) {
                warn!(%source, %platform, channel, "Failed to deliver message: {}", e);
            }
        }

        if self.commands.is_command(&message) {
            for reply in self.commands.dispatch(&message, &self.name, &self.statistics) {
                self.submit(Message::from_bridge(source.platform, source.channel.clone(), reply));
            }
        }

        self.statistics.record_completion(&message, Instant::now());
    }

    /// Connect both piers.
    ///
    /// If either pier fails, both are shut down again and the bridge goes
    /// back to `Stopped`.
    pub async fn start(self: &Arc<Self>) -> Result<(), BridgeError> {
        let _lifecycle = self.lifecycle.lock().await;

        async {
            let current = self.state();
            if current != BridgeState::Stopped {
                return Err(BridgeError::InvalidState {
                    name: self.name.clone(),
                    state: current.to_string(),
                });
            }

            self.state.send_replace(BridgeState::Starting);
            self.gate.open();
            info!("Starting bridge...");

            let handle = BridgeHandle::new(self);
            let started = futures::future::try_join(
                self.irc.start(handle.clone()),
                self.discord.start(handle),
            )
            .await;

            match started {
                Ok(_) => {
                    self.state.send_replace(BridgeState::Running);
                    info!(
                        mappings = self.mappings.len(),
                        mutators = ?self.mutators.names(),
                        commands = ?self.commands.names(),
                        "Bridge running"
                    );
                    Ok(())
                }
                Err(e) => {
                    error!("Bridge failed to start: {}", e);
                    self.stop_piers().await;
                    self.gate.close();
                    self.state.send_replace(BridgeState::Stopped);
                    Err(BridgeError::StartFailed {
                        name: self.name.clone(),
                        source: e,
                    })
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Stop both piers, let running submits finish, then persist
    /// statistics. No-op unless running.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        async {
            if self.state() != BridgeState::Running {
                debug!("Bridge is not running, nothing to shut down");
                return;
            }

            info!("Shutting down bridge...");
            self.stop_piers().await;
            self.gate.close();
            self.state.send_replace(BridgeState::Stopped);
            if timeout(DRAIN_TIMEOUT, self.gate.drained()).await.is_err() {
                warn!("Messages still in flight after {}s, saving statistics anyway", DRAIN_TIMEOUT.as_secs());
            }
            self.persist_statistics();
        }
        .instrument(self.span.clone())
        .await
    }

    async fn stop_piers(&self) {
        futures::future::join(self.irc.on_shutdown(), self.discord.on_shutdown()).await;
    }

    fn persist_statistics(&self) {
        let snapshot = self.statistics.snapshot();
        match self.store.save(&snapshot) {
            Ok(()) => info!(messages = snapshot.message_count, "Statistics saved"),
            Err(e) => error!("Failed to save statistics: {}", e),
        }
    }
}

/// Builder for a [`Bridge`].
pub struct BridgeBuilder {
    config: BridgeConfig,
    piers: Vec<Arc<dyn Pier>>,
    store: Option<Box<dyn StatisticsStore>>,
    span: Option<Span>,
    commands: Vec<Box<dyn Command>>,
    mutators: Vec<Box<dyn Mutator>>,
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            piers: Vec::new(),
            store: None,
            span: None,
            commands: Vec::new(),
            mutators: Vec::new(),
        }
    }

    /// Attach the pier for its platform.
    pub fn pier(mut self, pier: Arc<dyn Pier>) -> Self {
        self.piers.push(pier);
        self
    }

    /// Where statistics are persisted. Defaults to the configured JSON file.
    pub fn store(mut self, store: impl StatisticsStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Span every log line of this bridge is recorded in.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Register a command next to the built-in ones.
    #[cfg(test)]
    pub fn command(mut self, command: impl Command + 'static) -> Self {
        self.commands.push(Box::new(command));
        self
    }

    /// Append a mutator after the configured ones.
    #[cfg(test)]
    pub fn mutator(mut self, mutator: impl Mutator + 'static) -> Self {
        self.mutators.push(Box::new(mutator));
        self
    }

    /// Build the bridge and restore its persisted statistics.
    pub fn build(self) -> Result<Arc<Bridge>, BridgeError> {
        let config = self.config;
        let span = self
            .span
            .unwrap_or_else(|| info_span!("bridge", name = %config.name));

        let (mappings, mutators, commands, statistics, store) = span.in_scope(|| {
            let mappings = ChannelMappingManager::new(&config.channel_mappings)?;

            let mut mutators = MutatorPipeline::from_specs(&config.mutators, &config.command_prefix);
            for mutator in self.mutators {
                mutators.push(mutator);
            }

            let mut commands = CommandDispatcher::with_builtin_commands(config.command_prefix.clone());
            for command in self.commands {
                commands.register(command);
            }

            let store = self
                .store
                .unwrap_or_else(|| Box::new(JsonFileStore::new(config.statistics_file.clone())));
            let statistics = StatisticsTracker::new();
            match store.load() {
                Ok(Some(snapshot)) => {
                    info!(messages = snapshot.message_count, "Restored statistics");
                    statistics.restore(snapshot);
                }
                Ok(None) => debug!("No saved statistics, starting fresh"),
                Err(e) => warn!("Failed to load statistics, starting fresh: {}", e),
            }

            Ok::<_, BridgeError>((mappings, mutators, commands, statistics, store))
        })?;

        let mut discord = None;
        let mut irc = None;
        for pier in self.piers {
            let slot = match pier.platform() {
                Platform::Discord => &mut discord,
                Platform::Irc => &mut irc,
            };
            if slot.replace(pier).is_some() {
                warn!(bridge = %config.name, "More than one pier for a platform, keeping the last");
            }
        }
        let missing = |platform| BridgeError::MissingPier {
            name: config.name.clone(),
            platform,
        };
        let discord = discord.ok_or_else(|| missing(Platform::Discord))?;
        let irc = irc.ok_or_else(|| missing(Platform::Irc))?;

        let (state, _) = watch::channel(BridgeState::Stopped);

        Ok(Arc::new(Bridge {
            name: config.name,
            mappings,
            mutators,
            commands,
            statistics,
            store,
            discord,
            irc,
            state,
            gate: SubmitGate::closed(),
            lifecycle: Mutex::new(()),
            span,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;
    use crate::common::error::{CommandError, MutatorError, PersistenceError};
    use crate::common::{Destinations, Sender, Source};
    use crate::config::types::{ChannelMapping, DiscordSettings, IrcSettings, MutatorSpec};
    use crate::mutator::testing::{Append, DropAll, Failing};
    use crate::mutator::Mutation;
    use crate::pier::testing::RecordingPier;
    use crate::stats::StatisticsSnapshot;

    // ============================================================
    // Fixtures
    // ============================================================

    /// In-memory statistics store.
    #[derive(Clone, Default)]
    struct MemoryStore {
        initial: Option<StatisticsSnapshot>,
        fail: bool,
        saved: Arc<StdMutex<Vec<StatisticsSnapshot>>>,
    }

    impl MemoryStore {
        fn with_baseline(snapshot: StatisticsSnapshot) -> Self {
            Self {
                initial: Some(snapshot),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn saved(&self) -> Vec<StatisticsSnapshot> {
            self.saved.lock().unwrap().clone()
        }

        fn error() -> PersistenceError {
            PersistenceError::Io {
                path: "memory".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            }
        }
    }

    impl StatisticsStore for MemoryStore {
        fn load(&self) -> Result<Option<StatisticsSnapshot>, PersistenceError> {
            if self.fail {
                return Err(Self::error());
            }
            Ok(self.initial)
        }

        fn save(&self, snapshot: &StatisticsSnapshot) -> Result<(), PersistenceError> {
            if self.fail {
                return Err(Self::error());
            }
            self.saved.lock().unwrap().push(*snapshot);
            Ok(())
        }
    }

    /// Addresses both platforms, echoing the message back where it came from.
    struct EchoToOrigin;

    impl Mutator for EchoToOrigin {
        fn name(&self) -> &'static str {
            "echo-to-origin"
        }

        fn mutate(&self, message: Message) -> Result<Mutation, MutatorError> {
            Ok(Mutation::Continue(message.with_destinations(Destinations::all())))
        }
    }

    struct Shout;

    impl Command for Shout {
        fn name(&self) -> &'static str {
            "shout"
        }

        fn description(&self) -> &'static str {
            "Repeat loudly"
        }

        fn run(
            &self,
            _ctx: &crate::command::CommandContext<'_>,
            _message: &Message,
            args: &str,
        ) -> Result<String, CommandError> {
            // Starts with the prefix on purpose: must not dispatch again.
            Ok(format!("!{}", args.to_uppercase()))
        }
    }

    fn test_config(mutators: Vec<MutatorSpec>) -> BridgeConfig {
        BridgeConfig {
            name: "main".to_string(),
            command_prefix: "!".to_string(),
            statistics_file: PathBuf::from("unused-stats.json"),
            discord: DiscordSettings {
                token: "token".to_string(),
                format: "**<%user>** %message".to_string(),
                webhooks: Default::default(),
            },
            irc: IrcSettings {
                server: "irc.example.net".to_string(),
                port: 6667,
                nickname: "BridgeBot".to_string(),
                username: "BridgeBot".to_string(),
                realname: "BridgeBot".to_string(),
                password: None,
                use_ssl: false,
                allow_invalid_certs: false,
                anti_ping: true,
                no_prefix_regex: None,
                announce_forwarded_sender: false,
                reply_context_limit: 90,
                announce_joins_and_quits: false,
                announce_extras: false,
                init_commands: Vec::new(),
                format: "<%user> %message".to_string(),
            },
            channel_mappings: vec![ChannelMapping::new("123", "#general")],
            mutators,
        }
    }

    struct Harness {
        bridge: Arc<Bridge>,
        discord: Arc<RecordingPier>,
        irc: Arc<RecordingPier>,
        store: MemoryStore,
    }

    fn make_builder(mutators: Vec<MutatorSpec>) -> (BridgeBuilder, Arc<RecordingPier>, Arc<RecordingPier>) {
        let discord = RecordingPier::new(Platform::Discord);
        let irc = RecordingPier::new(Platform::Irc);
        let builder = BridgeBuilder::new(test_config(mutators))
            .pier(discord.clone())
            .pier(irc.clone());
        (builder, discord, irc)
    }

    async fn start(builder: BridgeBuilder, store: MemoryStore) -> Arc<Bridge> {
        let bridge = builder.store(store).build().unwrap();
        bridge.start().await.unwrap();
        bridge
    }

    async fn running(mutators: Vec<MutatorSpec>) -> Harness {
        let (builder, discord, irc) = make_builder(mutators);
        let store = MemoryStore::default();
        let bridge = start(builder, store.clone()).await;
        Harness {
            bridge,
            discord,
            irc,
            store,
        }
    }

    fn discord_message(channel: &str, contents: &str) -> Message {
        Message::new(
            Source::new(Platform::Discord, channel, Sender::new("42", "alice")),
            contents,
        )
    }

    fn irc_message(channel: &str, contents: &str) -> Message {
        Message::new(
            Source::new(Platform::Irc, channel, Sender::new("bob!b@host", "bob")),
            contents,
        )
    }

    fn count(bridge: &Bridge) -> u64 {
        bridge.statistics().snapshot().message_count
    }

    // ============================================================
    // Routing
    // ============================================================

    #[tokio::test]
    async fn test_discord_to_irc() {
        let h = running(Vec::new()).await;

        h.bridge.submit(discord_message("123", "hello"));

        assert_eq!(h.irc.sent(), vec![("#general".to_string(), "hello".to_string())]);
        assert!(h.discord.sent().is_empty());
        assert_eq!(count(&h.bridge), 1);
    }

    #[tokio::test]
    async fn test_irc_to_discord() {
        let h = running(Vec::new()).await;

        h.bridge.submit(irc_message("#General", "hi there"));

        assert_eq!(h.discord.sent(), vec![("123".to_string(), "hi there".to_string())]);
        assert!(h.irc.sent().is_empty());
        assert_eq!(count(&h.bridge), 1);
    }

    #[tokio::test]
    async fn test_unmapped_channel_is_discarded() {
        let h = running(Vec::new()).await;

        h.bridge.submit(discord_message("999", "hello"));
        h.bridge.submit(irc_message("#random", "hello"));

        assert!(h.irc.sent().is_empty());
        assert!(h.discord.sent().is_empty());
        assert_eq!(count(&h.bridge), 0);
    }

    #[tokio::test]
    async fn test_inbound_through_handle() {
        let h = running(Vec::new()).await;

        assert!(h.irc.receive(irc_message("#general", "via pier")));

        assert_eq!(h.discord.sent(), vec![("123".to_string(), "via pier".to_string())]);
    }

    #[tokio::test]
    async fn test_echo_to_origin_is_opt_in() {
        let (builder, discord, irc) = make_builder(Vec::new());
        let bridge = start(builder.mutator(EchoToOrigin), MemoryStore::default()).await;

        bridge.submit(discord_message("123", "echo"));

        assert_eq!(irc.sent(), vec![("#general".to_string(), "echo".to_string())]);
        assert_eq!(discord.sent(), vec![("123".to_string(), "echo".to_string())]);
        assert_eq!(count(&bridge), 1);
    }

    #[tokio::test]
    async fn test_send_failure_does_not_stop_delivery() {
        let (builder, discord, irc) = make_builder(Vec::new());
        let bridge = start(builder.mutator(EchoToOrigin), MemoryStore::default()).await;
        irc.set_fail_send(true);

        bridge.submit(discord_message("123", "still delivered"));

        assert!(irc.sent().is_empty());
        assert_eq!(discord.sent(), vec![("123".to_string(), "still delivered".to_string())]);
        assert_eq!(count(&bridge), 1);
    }

    // ============================================================
    // Mutators
    // ============================================================

    #[tokio::test]
    async fn test_mutators_see_previous_output() {
        let (first, _) = Append::new("-a");
        let (second, seen_by_second) = Append::new("-b");
        let (builder, _discord, irc) = make_builder(Vec::new());
        let bridge = start(builder.mutator(first).mutator(second), MemoryStore::default()).await;

        bridge.submit(discord_message("123", "hello"));

        assert_eq!(irc.sent(), vec![("#general".to_string(), "hello-a-b".to_string())]);
        assert_eq!(*seen_by_second.lock().unwrap(), vec!["hello-a".to_string()]);
    }

    #[tokio::test]
    async fn test_drop_anywhere_means_no_send_and_no_stats() {
        for position in 0..3 {
            let (builder, discord, irc) = make_builder(Vec::new());
            let mut builder = builder;
            for index in 0..3 {
                builder = if index == position {
                    builder.mutator(DropAll)
                } else {
                    builder.mutator(Append::new("-x").0)
                };
            }
            let bridge = start(builder, MemoryStore::default()).await;

            bridge.submit(discord_message("123", "hello"));

            assert!(irc.sent().is_empty());
            assert!(discord.sent().is_empty());
            assert_eq!(count(&bridge), 0);
        }
    }

    #[tokio::test]
    async fn test_failing_mutator_drops_message() {
        let (builder, discord, irc) = make_builder(Vec::new());
        let bridge = start(builder.mutator(Failing), MemoryStore::default()).await;

        bridge.submit(irc_message("#general", "hello"));

        assert!(irc.sent().is_empty());
        assert!(discord.sent().is_empty());
        assert_eq!(count(&bridge), 0);
    }

    #[tokio::test]
    async fn test_configured_filter() {
        let h = running(vec![MutatorSpec::Filter {
            patterns: vec!["^spam".to_string()],
            platforms: None,
        }])
        .await;

        h.bridge.submit(irc_message("#general", "spam and eggs"));
        h.bridge.submit(irc_message("#general", "eggs and spam"));

        assert_eq!(h.discord.sent(), vec![("123".to_string(), "eggs and spam".to_string())]);
        assert_eq!(count(&h.bridge), 1);
    }

    // ============================================================
    // Commands
    // ============================================================

    #[tokio::test]
    async fn test_stats_command_with_suppression() {
        let h = running(vec![MutatorSpec::SuppressCommands]).await;

        h.bridge.submit(irc_message("#general", "!stats"));

        // Only the reply is posted, once on each side.
        let irc_sent = h.irc.sent_messages();
        let discord_sent = h.discord.sent_messages();
        assert_eq!(irc_sent.len(), 1);
        assert_eq!(discord_sent.len(), 1);

        let (irc_channel, irc_reply) = &irc_sent[0];
        let (discord_channel, discord_reply) = &discord_sent[0];
        assert_eq!(irc_channel, "#general");
        assert_eq!(discord_channel, "123");
        assert!(irc_reply.originates_from_bridge());
        assert!(irc_reply.contents().starts_with("main: up "));
        assert_eq!(irc_reply.contents(), discord_reply.contents());

        // The command and its reply both passed their pipelines.
        assert_eq!(count(&h.bridge), 2);
    }

    #[tokio::test]
    async fn test_prefix_without_command_gets_a_reply() {
        let h = running(vec![MutatorSpec::SuppressCommands]).await;

        h.bridge.submit(irc_message("#general", "!"));
        h.bridge.submit(irc_message("#general", "! lol that was great"));

        let reply = "No command given (try !help)".to_string();
        assert_eq!(
            h.irc.sent(),
            vec![("#general".to_string(), reply.clone()), ("#general".to_string(), reply.clone())]
        );
        assert_eq!(h.discord.sent(), vec![("123".to_string(), reply.clone()), ("123".to_string(), reply)]);
        assert_eq!(count(&h.bridge), 4);
    }

    #[tokio::test]
    async fn test_command_text_relayed_without_suppression() {
        let h = running(Vec::new()).await;

        h.bridge.submit(discord_message("123", "!help"));

        let irc_sent = h.irc.sent();
        assert_eq!(irc_sent.len(), 2);
        assert_eq!(irc_sent[0], ("#general".to_string(), "!help".to_string()));
        assert!(irc_sent[1].1.starts_with("Available commands:"));

        let discord_sent = h.discord.sent();
        assert_eq!(discord_sent.len(), 1);
        assert_eq!(discord_sent[0].0, "123");
        assert_eq!(discord_sent[0].1, irc_sent[1].1);
    }

    #[tokio::test]
    async fn test_reply_with_prefix_does_not_dispatch_again() {
        let (builder, discord, irc) = make_builder(vec![MutatorSpec::SuppressCommands]);
        let bridge = start(builder.command(Shout), MemoryStore::default()).await;

        bridge.submit(irc_message("#general", "!shout hi"));

        assert_eq!(irc.sent(), vec![("#general".to_string(), "!HI".to_string())]);
        assert_eq!(discord.sent(), vec![("123".to_string(), "!HI".to_string())]);
    }

    #[tokio::test]
    async fn test_bridge_message_never_dispatches() {
        let h = running(Vec::new()).await;

        h.bridge
            .submit(Message::from_bridge(Platform::Irc, "#general", "!help"));

        assert_eq!(h.irc.sent(), vec![("#general".to_string(), "!help".to_string())]);
        assert_eq!(h.discord.sent(), vec![("123".to_string(), "!help".to_string())]);
        assert_eq!(count(&h.bridge), 1);
    }

    #[tokio::test]
    async fn test_unknown_command_reply() {
        let h = running(vec![MutatorSpec::SuppressCommands]).await;

        h.bridge.submit(discord_message("123", "!nope"));

        assert_eq!(
            h.discord.sent(),
            vec![("123".to_string(), "Unknown command: nope (try !help)".to_string())]
        );
    }

    // ============================================================
    // Statistics
    // ============================================================

    #[tokio::test]
    async fn test_restored_baseline_is_extended() {
        let (builder, _discord, _irc) = make_builder(Vec::new());
        let store = MemoryStore::with_baseline(StatisticsSnapshot {
            message_count: 10,
            cumulative_latency_nanos: 1_000,
        });
        let bridge = start(builder, store).await;

        bridge.submit(discord_message("123", "hello"));

        let snapshot = bridge.statistics().snapshot();
        assert_eq!(snapshot.message_count, 11);
        assert!(snapshot.cumulative_latency_nanos >= 1_000);
    }

    #[test]
    fn test_load_failure_starts_empty() {
        let (builder, _discord, _irc) = make_builder(Vec::new());
        let bridge = builder.store(MemoryStore::failing()).build().unwrap();
        assert_eq!(bridge.statistics().snapshot(), StatisticsSnapshot::default());
    }

    #[tokio::test]
    async fn test_concurrent_submits_lose_nothing() {
        for _ in 0..5 {
            let h = running(Vec::new()).await;

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    for i in 0..500 {
                        h.bridge.submit(discord_message("123", &format!("d{}", i)));
                    }
                });
                scope.spawn(|| {
                    for i in 0..500 {
                        h.bridge.submit(irc_message("#general", &format!("i{}", i)));
                    }
                });
            });

            assert_eq!(count(&h.bridge), 1_000);
            assert_eq!(h.irc.sent().len(), 500);
            assert_eq!(h.discord.sent().len(), 500);
        }
    }

    #[tokio::test]
    async fn test_per_source_order_is_kept() {
        let h = running(Vec::new()).await;

        for i in 0..100 {
            h.bridge.submit(discord_message("123", &i.to_string()));
        }

        let order: Vec<String> = h.irc.sent().into_iter().map(|(_, contents)| contents).collect();
        let expected: Vec<String> = (0..100).map(|i| i.to_string()).collect();
        assert_eq!(order, expected);
    }

    // ============================================================
    // Lifecycle
    // ============================================================

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (builder, discord, irc) = make_builder(Vec::new());
        let store = MemoryStore::default();
        let bridge = builder.store(store.clone()).build().unwrap();
        assert_eq!(bridge.state(), BridgeState::Stopped);

        bridge.start().await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Running);
        assert_eq!((discord.starts(), irc.starts()), (1, 1));

        bridge.submit(discord_message("123", "hello"));
        bridge.shutdown().await;

        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert_eq!((discord.shutdowns(), irc.shutdowns()), (1, 1));
        assert_eq!(store.saved().len(), 1);
        assert_eq!(store.saved()[0].message_count, 1);
    }

    #[tokio::test]
    async fn test_shutdown_when_not_running_is_noop() {
        let h = running(Vec::new()).await;
        h.bridge.shutdown().await;
        h.bridge.shutdown().await;

        assert_eq!((h.discord.shutdowns(), h.irc.shutdowns()), (1, 1));
        assert_eq!(h.store.saved().len(), 1);

        let (builder, discord, _irc) = make_builder(Vec::new());
        let store = MemoryStore::default();
        let never_started = builder.store(store.clone()).build().unwrap();
        never_started.shutdown().await;
        assert_eq!(discord.shutdowns(), 0);
        assert!(store.saved().is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_stops_both_piers() {
        let discord = RecordingPier::failing_start(Platform::Discord);
        let irc = RecordingPier::new(Platform::Irc);
        let store = MemoryStore::default();
        let bridge = BridgeBuilder::new(test_config(Vec::new()))
            .pier(discord.clone())
            .pier(irc.clone())
            .store(store.clone())
            .build()
            .unwrap();

        let result = bridge.start().await;

        assert!(matches!(result, Err(BridgeError::StartFailed { .. })));
        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert_eq!((discord.shutdowns(), irc.shutdowns()), (1, 1));
        assert!(store.saved().is_empty());

        // Nothing is routed by a bridge that never came up.
        bridge.submit(irc_message("#general", "hello"));
        assert!(discord.sent().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let h = running(Vec::new()).await;
        assert!(matches!(
            h.bridge.start().await,
            Err(BridgeError::InvalidState { .. })
        ));
        assert_eq!(h.irc.starts(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_dropped() {
        let h = running(Vec::new()).await;
        h.bridge.shutdown().await;

        h.bridge.submit(discord_message("123", "late"));

        assert!(h.irc.sent().is_empty());
        assert_eq!(count(&h.bridge), 0);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_submit_in_flight() {
        let (builder, _discord, irc) = make_builder(Vec::new());
        let store = MemoryStore::default();
        let bridge = start(builder, store.clone()).await;
        irc.set_send_delay(Duration::from_millis(300));

        let submitter = {
            let bridge = Arc::clone(&bridge);
            std::thread::spawn(move || bridge.submit(discord_message("123", "slow")))
        };
        // Let the submit get past admission and into the slow send.
        tokio::time::sleep(Duration::from_millis(100)).await;

        bridge.shutdown().await;
        submitter.join().unwrap();

        assert_eq!(irc.sent(), vec![("#general".to_string(), "slow".to_string())]);
        assert_eq!(store.saved().len(), 1);
        assert_eq!(store.saved()[0].message_count, 1);
    }

    #[tokio::test]
    async fn test_restart_after_shutdown_accepts_messages() {
        let h = running(Vec::new()).await;
        h.bridge.shutdown().await;
        h.bridge.start().await.unwrap();

        h.bridge.submit(discord_message("123", "again"));

        assert_eq!(h.irc.sent(), vec![("#general".to_string(), "again".to_string())]);
    }

    #[tokio::test]
    async fn test_save_failure_still_stops() {
        let (builder, discord, _irc) = make_builder(Vec::new());
        let bridge = start(builder, MemoryStore::failing()).await;

        tokio::time::timeout(Duration::from_secs(5), bridge.shutdown())
            .await
            .unwrap();

        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert_eq!(discord.shutdowns(), 1);
    }

    #[test]
    fn test_missing_pier_is_rejected() {
        let result = BridgeBuilder::new(test_config(Vec::new()))
            .pier(RecordingPier::new(Platform::Irc))
            .store(MemoryStore::default())
            .build();
        assert!(matches!(
            result,
            Err(BridgeError::MissingPier {
                platform: Platform::Discord,
                ..
            })
        ));
    }

    #[test]
    fn test_malformed_mapping_is_rejected() {
        let mut config = test_config(Vec::new());
        config.channel_mappings.push(ChannelMapping::new("456", "#GENERAL"));

        let result = BridgeBuilder::new(config)
            .pier(RecordingPier::new(Platform::Irc))
            .pier(RecordingPier::new(Platform::Discord))
            .store(MemoryStore::default())
            .build();
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BridgeState::Starting.to_string(), "starting");
    }
}
