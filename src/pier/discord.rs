//! Discord pier.
//!
//! Wraps a serenity gateway client. Inbound guild messages are converted
//! and submitted from the event handler; outbound messages are queued and
//! posted by a writer task so `send_message` never waits on HTTP. Channels
//! with a configured webhook get IRC messages under the sender's own name.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use serenity::builder::{CreateAllowedMentions, CreateMessage, ExecuteWebhook};
use serenity::cache::Cache;
use serenity::client::{Client, Context, EventHandler};
use serenity::http::Http;
use serenity::model::channel::Message as DiscordMessage;
use serenity::model::gateway::{GatewayIntents, Ready};
use serenity::model::id::{ChannelId, UserId};
use serenity::model::webhook::Webhook;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::format::{body, split_chunks, MessageFormatter};
use super::{BridgeHandle, Pier};
use crate::common::error::PierError;
use crate::common::{Message, Platform, ReplyContext, Sender, Source};
use crate::config::types::DiscordSettings;

/// Discord rejects messages longer than this.
const MAX_MESSAGE_LENGTH: usize = 2000;

/// Discord's limit for a webhook username override.
const MAX_WEBHOOK_USERNAME: usize = 80;

const START_TIMEOUT: Duration = Duration::from_secs(60);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the writer keeps posting queued messages after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outbound {
    /// Posted by the bot account.
    Post { channel: ChannelId, content: String },
    /// Posted through a channel webhook under `username`.
    Webhook {
        channel: ChannelId,
        url: String,
        username: String,
        content: String,
    },
}

/// Discord side of a bridge.
pub struct DiscordPier {
    settings: DiscordSettings,
    formatter: MessageFormatter,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DiscordPier {
    pub fn new(settings: DiscordSettings) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let formatter = MessageFormatter::new(settings.format.clone());
        Self {
            settings,
            formatter,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn connect_failed(message: impl Into<String>) -> PierError {
        PierError::ConnectFailed {
            platform: Platform::Discord,
            message: message.into(),
        }
    }
}

#[async_trait]
impl Pier for DiscordPier {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    async fn start(&self, bridge: BridgeHandle) -> Result<(), PierError> {
        let outbound_rx = self
            .outbound_rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .ok_or_else(|| Self::connect_failed("pier was already started"))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (failed_tx, failed_rx) = oneshot::channel();
        let webhook_ids = self.settings.webhooks.values().filter_map(|url| webhook_id(url)).collect();
        let handler = Arc::new(DiscordEvents::new(bridge, ready_tx, webhook_ids));

        info!("Connecting to Discord...");
        let client = build_client(&self.settings.token, Arc::clone(&handler)).await?;

        let outlet = DiscordOutlet {
            http: Arc::clone(&client.http),
            cache: Arc::clone(&client.cache),
            webhooks: HashMap::new(),
        };
        let writer = tokio::spawn(run_writer(outlet, outbound_rx, self.shutdown_tx.subscribe()));
        let gateway = tokio::spawn(run_gateway(
            client,
            self.settings.token.clone(),
            handler,
            failed_tx,
            self.shutdown_tx.subscribe(),
        ));
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(writer);
            tasks.push(gateway);
        }

        tokio::select! {
            biased;
            failed = failed_rx => Err(failed.unwrap_or_else(|_| Self::connect_failed("gateway task ended"))),
            ready = ready_rx => ready.map_err(|_| Self::connect_failed("gateway closed before ready")),
            _ = sleep(START_TIMEOUT) => Err(Self::connect_failed(format!(
                "not ready after {}s",
                START_TIMEOUT.as_secs()
            ))),
        }
    }

    fn send_message(&self, target_channel: &str, message: &Message) -> Result<(), PierError> {
        if *self.shutdown_tx.borrow() {
            return Err(PierError::NotConnected {
                platform: Platform::Discord,
            });
        }

        let channel = target_channel
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .map(ChannelId::new)
            .ok_or_else(|| PierError::SendFailed {
                platform: Platform::Discord,
                channel: target_channel.to_string(),
                message: "not a Discord channel id".to_string(),
            })?;

        let name = &message.source().sender.display_name;
        let webhook = self
            .settings
            .webhooks
            .get(target_channel)
            .filter(|_| !message.originates_from_bridge());
        let queued: Vec<Outbound> = match webhook {
            Some(url) => {
                let username: String = name.chars().take(MAX_WEBHOOK_USERNAME).collect();
                split_chunks(&body(message), MAX_MESSAGE_LENGTH)
                    .into_iter()
                    .map(|content| Outbound::Webhook {
                        channel,
                        url: url.clone(),
                        username: username.clone(),
                        content,
                    })
                    .collect()
            }
            None => split_chunks(&self.formatter.format(message, name), MAX_MESSAGE_LENGTH)
                .into_iter()
                .map(|content| Outbound::Post { channel, content })
                .collect(),
        };

        for outbound in queued {
            self.outbound_tx
                .send(outbound)
                .map_err(|_| PierError::NotConnected {
                    platform: Platform::Discord,
                })?;
        }
        Ok(())
    }

    async fn on_shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .map(|mut tasks| tasks.drain(..).collect())
            .unwrap_or_default();
        for mut task in tasks {
            if timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                warn!("Discord task did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

// ============================================================
// Gateway
// ============================================================

struct DiscordEvents {
    bridge: BridgeHandle,
    ready_tx: Mutex<Option<oneshot::Sender<()>>>,
    own_id: OnceLock<UserId>,
    /// Our webhooks; what they post is our own relay output.
    webhook_ids: HashSet<u64>,
}

impl DiscordEvents {
    fn new(bridge: BridgeHandle, ready_tx: oneshot::Sender<()>, webhook_ids: HashSet<u64>) -> Self {
        Self {
            bridge,
            ready_tx: Mutex::new(Some(ready_tx)),
            own_id: OnceLock::new(),
            webhook_ids,
        }
    }

    fn is_ready(&self) -> bool {
        self.own_id.get().is_some()
    }
}

#[async_trait]
impl EventHandler for DiscordEvents {
    async fn ready(&self, _context: Context, ready: Ready) {
        info!("Discord bot connected as {}", ready.user.name);
        let _ = self.own_id.set(ready.user.id);

        let ready_tx = self.ready_tx.lock().ok().and_then(|mut tx| tx.take());
        if let Some(ready_tx) = ready_tx {
            let _ = ready_tx.send(());
        }
    }

    async fn message(&self, context: Context, message: DiscordMessage) {
        // Ignore our own messages
        if self.own_id.get() == Some(&message.author.id) {
            return;
        }
        if message
            .webhook_id
            .is_some_and(|id| self.webhook_ids.contains(&id.get()))
        {
            return;
        }

        // Only handle guild (server) messages
        if message.guild_id.is_none() {
            return;
        }

        let name = display_name(
            message.member.as_ref().and_then(|m| m.nick.as_deref()),
            message.author.global_name.as_deref(),
            &message.author.name,
        );
        let attachments = message.attachments.iter().map(|a| a.url.clone()).collect();
        let reply_to = message.referenced_message.as_deref().map(|referenced| ReplyContext {
            author: display_name(None, referenced.author.global_name.as_deref(), &referenced.author.name)
                .to_string(),
            contents: referenced.content_safe(&context.cache),
        });

        let Some(mut inbound) = inbound_message(
            message.channel_id.get(),
            message.author.id.get(),
            name,
            message.content_safe(&context.cache),
            attachments,
        ) else {
            return;
        };
        if let Some(reply_to) = reply_to {
            inbound = inbound.with_reply_to(reply_to);
        }

        if !self.bridge.submit(inbound) {
            debug!("Bridge is gone, dropping Discord message");
        }
    }
}

/// Name shown on IRC: server nickname, then global name, then username.
fn display_name<'a>(nick: Option<&'a str>, global_name: Option<&'a str>, username: &'a str) -> &'a str {
    let usable = |name: Option<&'a str>| name.filter(|name| !name.trim().is_empty());
    usable(nick).or(usable(global_name)).unwrap_or(username)
}

/// Id part of a `https://discord.com/api/webhooks/<id>/<token>` URL.
fn webhook_id(url: &str) -> Option<u64> {
    let (_, rest) = url.split_once("/webhooks/")?;
    rest.split('/').next()?.parse().ok()
}

/// Build the bridge message for a guild message. `None` if there is
/// nothing to relay.
fn inbound_message(
    channel_id: u64,
    author_id: u64,
    display_name: &str,
    contents: String,
    attachments: Vec<String>,
) -> Option<Message> {
    let contents = contents.trim().to_string();
    if contents.is_empty() && attachments.is_empty() {
        return None;
    }

    let source = Source::new(
        Platform::Discord,
        channel_id.to_string(),
        Sender::new(author_id.to_string(), display_name),
    );
    Some(Message::new(source, contents).with_attachments(attachments))
}

async fn build_client(token: &str, handler: Arc<DiscordEvents>) -> Result<Client, PierError> {
    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS;

    let client = Client::builder(token, intents)
        .event_handler_arc(handler)
        .await?;
    Ok(client)
}

/// Exponential backoff for Discord reconnection.
/// 5s initial, 5min max, factor 1.1, with jitter, unlimited retries.
fn discord_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(5))
        .with_max_delay(Duration::from_secs(300))
        .with_factor(1.1)
        .with_jitter()
        .without_max_times()
        .build()
}

async fn run_gateway(
    client: Client,
    token: String,
    handler: Arc<DiscordEvents>,
    failed_tx: oneshot::Sender<PierError>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut client = Some(client);
    let mut failed_tx = Some(failed_tx);
    let mut backoff = discord_backoff();

    loop {
        let mut current = match client.take() {
            Some(client) => client,
            None => match build_client(&token, Arc::clone(&handler)).await {
                Ok(client) => client,
                Err(e) => {
                    error!("Failed to rebuild Discord client: {}", e);
                    if wait_or_shutdown(&mut backoff, &mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            },
        };

        let shard_manager = Arc::clone(&current.shard_manager);
        let finished = tokio::select! {
            result = current.start() => Some(result),
            _ = shutdown_requested(&mut shutdown_rx) => None,
        };
        let Some(result) = finished else {
            info!("Initiating graceful Discord shutdown...");
            shard_manager.shutdown_all().await;
            info!("Discord shutdown complete");
            break;
        };

        match result {
            Ok(()) => {
                info!("Discord client disconnected normally");
                break;
            }
            Err(e) => {
                // Serenity reconnects by itself; an error here before the first
                // ready usually means bad credentials, which retrying won't fix.
                if !handler.is_ready() {
                    if let Some(failed_tx) = failed_tx.take() {
                        let _ = failed_tx.send(PierError::from(e));
                        break;
                    }
                }
                error!("Discord client error: {}", e);
                backoff = discord_backoff();
                if wait_or_shutdown(&mut backoff, &mut shutdown_rx).await {
                    break;
                }
            }
        }
    }

    info!("Discord task ended");
}

/// Sleep for the next backoff delay. Returns true if shutdown was requested.
async fn wait_or_shutdown(
    backoff: &mut impl Iterator<Item = Duration>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    let delay = backoff.next().unwrap_or(Duration::from_secs(300));
    warn!("Reconnecting to Discord in {:.1}s...", delay.as_secs_f64());
    tokio::select! {
        _ = sleep(delay) => false,
        _ = shutdown_requested(shutdown_rx) => true,
    }
}

async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

// ============================================================
// Writer
// ============================================================

/// Where the writer task hands queued messages.
#[async_trait]
trait Outlet: Send {
    async fn deliver(&mut self, outbound: Outbound);
}

/// Posts through the Discord HTTP API.
struct DiscordOutlet {
    http: Arc<Http>,
    cache: Arc<Cache>,
    /// Fetched webhooks by URL.
    webhooks: HashMap<String, Webhook>,
}

#[async_trait]
impl Outlet for DiscordOutlet {
    async fn deliver(&mut self, outbound: Outbound) {
        let http = &*self.http;
        match outbound {
            Outbound::Post { channel, content } => {
                if let Err(e) = channel.send_message(http, post_builder(content)).await {
                    warn!(channel = %channel, "Failed to post to Discord: {}", e);
                }
            }
            Outbound::Webhook {
                channel,
                url,
                username,
                content,
            } => {
                let avatar = member_avatar(&self.cache, channel, &username);
                let webhook = match self.webhooks.entry(url) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => match Webhook::from_url(http, entry.key()).await {
                        Ok(webhook) => entry.insert(webhook),
                        Err(e) => {
                            warn!(channel = %channel, "Failed to load Discord webhook: {}", e);
                            return;
                        }
                    },
                };

                let builder = webhook_builder(content, username, avatar);
                if let Err(e) = webhook.execute(http, false, builder).await {
                    warn!(channel = %channel, "Failed to post through Discord webhook: {}", e);
                }
            }
        }
    }
}

// Relayed text never pings anyone, whatever mutators are configured.

fn post_builder(content: String) -> CreateMessage {
    CreateMessage::new()
        .content(content)
        .allowed_mentions(CreateAllowedMentions::new())
}

fn webhook_builder(content: String, username: String, avatar: Option<String>) -> ExecuteWebhook {
    let builder = ExecuteWebhook::new()
        .content(content)
        .username(username)
        .allowed_mentions(CreateAllowedMentions::new());
    match avatar {
        Some(avatar) => builder.avatar_url(avatar),
        None => builder,
    }
}

/// Avatar of the guild member called `name` in the guild owning `channel`,
/// so a relayed IRC user who is also on Discord keeps their picture.
fn member_avatar(cache: &Cache, channel: ChannelId, name: &str) -> Option<String> {
    cache.guilds().into_iter().find_map(|guild_id| {
        let guild = cache.guild(guild_id)?;
        if !guild.channels.contains_key(&channel) {
            return None;
        }
        guild
            .members
            .values()
            .find(|member| {
                member.nick.as_deref() == Some(name)
                    || member.user.global_name.as_deref() == Some(name)
                    || member.user.name == name
            })
            .map(|member| member.face())
    })
}

async fn run_writer<O: Outlet>(
    mut outlet: O,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(outbound) = outbound else { break };
                outlet.deliver(outbound).await;
            }
            _ = shutdown_requested(&mut shutdown_rx) => break,
        }
    }

    // Replies queued just before shutdown still go out.
    outbound_rx.close();
    let drain = async {
        while let Some(outbound) = outbound_rx.recv().await {
            outlet.deliver(outbound).await;
        }
    };
    if timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!("Dropped queued Discord messages after {}s", DRAIN_TIMEOUT.as_secs());
    }
    debug!("Discord writer ended");
}
