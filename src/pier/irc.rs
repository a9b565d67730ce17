//! IRC pier.
//!
//! Speaks the small part of the client protocol a relay needs: register,
//! join the mapped channels, answer PINGs, relay PRIVMSGs and, when asked
//! to, membership changes. The connection task owns the socket (plain TCP
//! or TLS); the pier itself only queues outbound lines, so `send_message`
//! never waits on the network.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use bytes::{BufMut, BytesMut};
use fancy_regex::Regex;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{self, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, error, info, warn};

use super::format::{anti_ping, body, floor_char_boundary, split_lines, MessageFormatter};
use super::{BridgeHandle, Pier};
use crate::common::error::PierError;
use crate::common::{Destinations, Message, Platform, Sender, Source};
use crate::config::types::IrcSettings;

/// Longest line we accept from the server before giving up on it.
const MAX_INBOUND_LINE: usize = 8192;

/// RFC 1459 line limit, excluding CRLF.
const MAX_OUTBOUND_LINE: usize = 510;

/// Room for the text of one PRIVMSG once the server adds our prefix.
const MAX_MESSAGE_BYTES: usize = 400;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const START_TIMEOUT: Duration = Duration::from_secs(60);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const QUIT_MESSAGE: &str = "Bridge shutting down";

// ============================================================
// Protocol
// ============================================================

/// One IRC protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcLine {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcLine {
    pub fn new<I, S>(command: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: None,
            command: command.to_string(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", [target, text])
    }

    /// Parse a raw line. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        // IRCv3 message tags are not used.
        if rest.starts_with('@') {
            rest = rest.split_once(' ')?.1.trim_start();
        }

        let prefix = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (prefix, remainder) = stripped.split_once(' ')?;
                rest = remainder.trim_start();
                Some(prefix.to_string())
            }
            None => None,
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };

        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?.to_ascii_uppercase();
        let mut params: Vec<String> = words.map(String::from).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    /// Nickname part of the prefix (`nick!user@host`).
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split_once('!').map_or(prefix, |(nick, _)| nick))
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

impl fmt::Display for IrcLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        f.write_str(&self.command)?;

        if let Some((last, init)) = self.params.split_last() {
            for param in init {
                write!(f, " {}", param)?;
            }
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                write!(f, " :{}", last)?;
            } else {
                write!(f, " {}", last)?;
            }
        }
        Ok(())
    }
}

/// Line codec for IRC connections.
#[derive(Debug, Default)]
pub struct IrcCodec {
    /// Where to resume the newline search in a partial buffer.
    next_index: usize,
}

impl Decoder for IrcCodec {
    type Item = IrcLine;
    type Error = PierError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_INBOUND_LINE {
                    return Err(PierError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "IRC line too long",
                    )));
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let end = self.next_index + offset;
            self.next_index = 0;
            let raw = src.split_to(end + 1);

            // Servers relay whatever bytes clients send; don't drop the line over bad UTF-8.
            let text = String::from_utf8_lossy(&raw[..end]);
            if let Some(line) = IrcLine::parse(&text) {
                return Ok(Some(line));
            }
        }
    }
}

impl Encoder<IrcLine> for IrcCodec {
    type Error = PierError;

    fn encode(&mut self, item: IrcLine, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut text: String = item
            .to_string()
            .chars()
            .map(|c| if matches!(c, '\r' | '\n' | '\0') { ' ' } else { c })
            .collect();
        text.truncate(floor_char_boundary(&text, MAX_OUTBOUND_LINE));

        dst.reserve(text.len() + 2);
        dst.put_slice(text.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Convert a PRIVMSG into a bridge message.
///
/// Returns `None` for our own messages, private messages and CTCP other
/// than ACTION.
pub fn inbound_message(line: &IrcLine, own_nick: &str) -> Option<Message> {
    if line.command != "PRIVMSG" {
        return None;
    }
    let nick = line.source_nick()?;
    if nick.eq_ignore_ascii_case(own_nick) {
        return None;
    }
    let channel = line.param(0)?;
    if !channel.starts_with(['#', '&']) {
        return None;
    }
    let text = line.param(1)?;

    let contents = match text.strip_prefix('\u{1}') {
        Some(ctcp) => {
            let ctcp = ctcp.strip_suffix('\u{1}').unwrap_or(ctcp);
            let action = ctcp.strip_prefix("ACTION ")?;
            format!("_{}_", action)
        }
        None => text.to_string(),
    };

    let prefix = line.prefix.clone().unwrap_or_default();
    Some(Message::new(
        Source::new(Platform::Irc, channel, Sender::new(prefix, nick)),
        contents,
    ))
}

/// Nicknames seen in each joined channel, so a QUIT or NICK (which name
/// no channel) can be attributed to the channels it affects.
#[derive(Debug, Default)]
struct Roster {
    channels: HashMap<String, HashSet<String>>,
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl Roster {
    fn add(&mut self, channel: &str, nick: &str) {
        self.channels.entry(fold(channel)).or_default().insert(fold(nick));
    }

    fn remove(&mut self, channel: &str, nick: &str) {
        if let Some(nicks) = self.channels.get_mut(&fold(channel)) {
            nicks.remove(&fold(nick));
        }
    }

    fn forget(&mut self, channel: &str) {
        self.channels.remove(&fold(channel));
    }

    /// Remove `nick` everywhere, re-adding it as `renamed` if given.
    /// Returns the affected channels, sorted.
    fn depart(&mut self, nick: &str, renamed: Option<&str>) -> Vec<String> {
        let nick = fold(nick);
        let mut affected: Vec<String> = self
            .channels
            .iter_mut()
            .filter_map(|(channel, nicks)| {
                if !nicks.remove(&nick) {
                    return None;
                }
                if let Some(renamed) = renamed {
                    nicks.insert(fold(renamed));
                }
                Some(channel.clone())
            })
            .collect();
        affected.sort();
        affected
    }
}

fn with_reason(text: String, reason: Option<&str>) -> String {
    match reason.filter(|r| !r.is_empty()) {
        Some(reason) => format!("{} ({})", text, reason),
        None => text,
    }
}

/// Update `roster` from a membership line and build the announcements
/// the settings ask for. Our own comings and goings are never announced.
fn track_membership(
    line: &IrcLine,
    own_nick: &str,
    roster: &mut Roster,
    settings: &IrcSettings,
) -> Vec<Message> {
    let who = line.source_nick().unwrap_or_default();
    let ours = |nick: &str| nick.eq_ignore_ascii_case(own_nick);
    let actor = match line.prefix.as_deref().and_then(|p| p.split_once('!')) {
        Some((nick, mask)) => format!("{} ({})", nick, mask),
        None => who.to_string(),
    };
    let announce = |channel: &str, text: String| {
        Message::from_bridge(Platform::Irc, channel, text)
            .with_destinations(Destinations::only(Platform::Discord))
    };
    let joins = settings.announce_joins_and_quits;
    let extras = settings.announce_extras;

    match line.command.as_str() {
        // RPL_NAMREPLY: <me> <type> <channel> :<names>
        "353" => {
            if let (Some(channel), Some(names)) = (line.param(2), line.param(3)) {
                for name in names.split(' ').filter(|n| !n.is_empty()) {
                    roster.add(channel, name.trim_start_matches(['~', '&', '@', '%', '+']));
                }
            }
            Vec::new()
        }
        "JOIN" => {
            let Some(channel) = line.param(0) else {
                return Vec::new();
            };
            if ours(who) {
                roster.forget(channel);
            }
            roster.add(channel, who);
            if ours(who) || !joins {
                return Vec::new();
            }
            vec![announce(channel, format!("{} has joined {}", actor, channel))]
        }
        "PART" => {
            let Some(channel) = line.param(0) else {
                return Vec::new();
            };
            if ours(who) {
                roster.forget(channel);
                return Vec::new();
            }
            roster.remove(channel, who);
            if !joins {
                return Vec::new();
            }
            let text = format!("{} has left {}", actor, channel);
            vec![announce(channel, with_reason(text, line.param(1)))]
        }
        "KICK" => {
            let (Some(channel), Some(kicked)) = (line.param(0), line.param(1)) else {
                return Vec::new();
            };
            if ours(kicked) {
                warn!("Kicked from {} by {}", channel, who);
                roster.forget(channel);
                return Vec::new();
            }
            roster.remove(channel, kicked);
            if !joins {
                return Vec::new();
            }
            let text = format!("{} was kicked from {} by {}", kicked, channel, who);
            vec![announce(channel, with_reason(text, line.param(2)))]
        }
        "QUIT" => {
            if ours(who) {
                return Vec::new();
            }
            let channels = roster.depart(who, None);
            if !joins {
                return Vec::new();
            }
            channels
                .iter()
                .map(|channel| {
                    let text = format!("{} has quit", actor);
                    announce(channel.as_str(), with_reason(text, line.param(0)))
                })
                .collect()
        }
        "NICK" => {
            let Some(renamed) = line.param(0) else {
                return Vec::new();
            };
            let channels = roster.depart(who, Some(renamed));
            if ours(who) || !extras {
                return Vec::new();
            }
            channels
                .iter()
                .map(|channel| announce(channel.as_str(), format!("{} is now known as {}", who, renamed)))
                .collect()
        }
        "TOPIC" if extras && !ours(who) => {
            let Some(channel) = line.param(0) else {
                return Vec::new();
            };
            let text = match line.param(1).filter(|t| !t.is_empty()) {
                Some(topic) => format!("{} changed the topic of {} to: {}", who, channel, topic),
                None => format!("{} cleared the topic of {}", who, channel),
            };
            vec![announce(channel, text)]
        }
        "MODE" if extras && !ours(who) => {
            let Some(channel) = line.param(0).filter(|c| c.starts_with(['#', '&'])) else {
                return Vec::new();
            };
            let modes = line.params[1..].join(" ");
            vec![announce(channel, format!("{} set mode {} on {}", who, modes, channel))]
        }
        _ => Vec::new(),
    }
}

/// The `Reply to "author: text"` line sent ahead of a Discord reply.
fn reply_context_line(message: &Message, limit: usize, anti_ping_names: bool) -> Option<String> {
    let reply = message.reply_to()?;
    if limit == 0 {
        return None;
    }

    let mut context = reply.contents.split_whitespace().collect::<Vec<_>>().join(" ");
    if context.chars().count() > limit {
        context = context.chars().take(limit).collect::<String>() + "...";
    }
    let author = if anti_ping_names {
        anti_ping(&reply.author)
    } else {
        reply.author.clone()
    };
    Some(format!("Reply to \"{}: {}\"", author, context))
}

// ============================================================
// TLS
// ============================================================

/// Certificate verifier for `allow-invalid-ssl-certs`: any chain is
/// accepted, handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn tls_connector(allow_invalid_certs: bool) -> Result<TlsConnector, PierError> {
    let provider = Arc::new(crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| PierError::ConnectFailed {
            platform: Platform::Irc,
            message: format!("TLS setup failed: {}", e),
        })?;

    let config = if allow_invalid_certs {
        warn!("IRC server certificates will not be verified");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Byte stream to the server, plain or TLS.
trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

async fn open_transport(shared: &Shared) -> Result<Box<dyn Transport>, PierError> {
    let host = shared.settings.server.as_str();
    let stream = TcpStream::connect((host, shared.settings.port)).await?;
    let Some(tls) = &shared.tls else {
        return Ok(Box::new(stream));
    };

    let server_name = ServerName::try_from(host.to_string()).map_err(|e| PierError::ConnectFailed {
        platform: Platform::Irc,
        message: format!("'{}' is not a valid TLS server name: {}", host, e),
    })?;
    let stream = tls.connect(server_name, stream).await?;
    Ok(Box::new(stream))
}

// ============================================================
// Pier
// ============================================================

/// IRC side of a bridge.
pub struct IrcPier {
    settings: IrcSettings,
    channels: Vec<String>,
    formatter: MessageFormatter,
    no_prefix: Option<Regex>,
    outbound_tx: mpsc::UnboundedSender<IrcLine>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<IrcLine>>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IrcPier {
    /// `channels` are joined on every (re)connect.
    pub fn new(settings: IrcSettings, channels: Vec<String>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let formatter = MessageFormatter::new(settings.format.clone());
        let no_prefix = settings.no_prefix_regex.as_deref().and_then(|pattern| {
            Regex::new(pattern)
                .map_err(|e| warn!("Ignoring invalid no-prefix-regex '{}': {}", pattern, e))
                .ok()
        });
        Self {
            settings,
            channels,
            formatter,
            no_prefix,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    fn not_connected(&self) -> PierError {
        PierError::NotConnected {
            platform: Platform::Irc,
        }
    }

    /// Messages matching `no-prefix-regex` go out as typed, so bots on
    /// the IRC side see their own command syntax.
    fn skips_prefix(&self, message: &Message) -> bool {
        let Some(pattern) = &self.no_prefix else {
            return false;
        };
        if message.originates_from_bridge() {
            return false;
        }
        match pattern.is_match(message.contents()) {
            Ok(matched) => matched,
            Err(e) => {
                warn!("no-prefix-regex could not be evaluated: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl Pier for IrcPier {
    fn platform(&self) -> Platform {
        Platform::Irc
    }

    async fn start(&self, bridge: BridgeHandle) -> Result<(), PierError> {
        let tls = if self.settings.use_ssl {
            Some(tls_connector(self.settings.allow_invalid_certs)?)
        } else {
            None
        };
        let outbound_rx = self
            .outbound_rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .ok_or_else(|| PierError::ConnectFailed {
                platform: Platform::Irc,
                message: "pier was already started".to_string(),
            })?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = Shared {
            settings: self.settings.clone(),
            channels: self.channels.clone(),
            tls,
            bridge,
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(run_connection(shared, outbound_rx, ready_tx, shutdown_rx));
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }

        match timeout(START_TIMEOUT, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PierError::ConnectFailed {
                platform: Platform::Irc,
                message: "connection task ended before registering".to_string(),
            }),
            Err(_) => Err(PierError::ConnectFailed {
                platform: Platform::Irc,
                message: format!("no welcome from server after {}s", START_TIMEOUT.as_secs()),
            }),
        }
    }

    fn send_message(&self, target_channel: &str, message: &Message) -> Result<(), PierError> {
        if *self.shutdown_tx.borrow() {
            return Err(self.not_connected());
        }

        let name = &message.source().sender.display_name;
        let user = if self.settings.anti_ping {
            anti_ping(name)
        } else {
            name.clone()
        };

        let mut lines = Vec::new();
        lines.extend(reply_context_line(
            message,
            self.settings.reply_context_limit,
            self.settings.anti_ping,
        ));
        let text = if self.skips_prefix(message) {
            if self.settings.announce_forwarded_sender {
                lines.push(format!("Forwarded from {}", user));
            }
            body(message)
        } else {
            self.formatter.format(message, &user)
        };
        lines.extend(split_lines(&text, MAX_MESSAGE_BYTES));

        for line in lines {
            self.outbound_tx
                .send(IrcLine::privmsg(target_channel, &line))
                .map_err(|_| self.not_connected())?;
        }
        Ok(())
    }

    async fn on_shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(mut task) = task {
            if timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                warn!("IRC connection did not close in time, aborting");
                task.abort();
            }
        }
    }
}

// ============================================================
// Connection task
// ============================================================

/// Connection settings shared by every reconnect.
struct Shared {
    settings: IrcSettings,
    channels: Vec<String>,
    tls: Option<TlsConnector>,
    bridge: BridgeHandle,
}

/// How a connected session ended without an error.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Exponential backoff for IRC reconnection.
/// 5s initial, 5min max, factor 1.5, with jitter, unlimited retries.
fn irc_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(5))
        .with_max_delay(Duration::from_secs(300))
        .with_factor(1.5)
        .with_jitter()
        .without_max_times()
        .build()
}

async fn run_connection(
    shared: Shared,
    mut outbound: mpsc::UnboundedReceiver<IrcLine>,
    ready: oneshot::Sender<Result<(), PierError>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ready = Some(ready);
    let mut backoff = irc_backoff();
    let host = shared.settings.server.as_str();
    let port = shared.settings.port;

    while !*shutdown_rx.borrow() {
        let scheme = if shared.tls.is_some() { "ircs" } else { "irc" };
        info!("Connecting to {}://{}:{}...", scheme, host, port);

        let result = match timeout(CONNECT_TIMEOUT, open_transport(&shared)).await {
            Ok(Ok(transport)) => {
                let connection = Framed::new(transport, IrcCodec::default());
                run_session(&shared, connection, &mut outbound, &mut ready, &mut shutdown_rx).await
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PierError::ConnectFailed {
                platform: Platform::Irc,
                message: format!("timed out connecting to {}:{}", host, port),
            }),
        };

        // Failures before the first welcome are reported to `start` instead of retried.
        if let Some(ready) = ready.take() {
            let error = match result {
                Err(e) => e,
                Ok(_) => PierError::ConnectFailed {
                    platform: Platform::Irc,
                    message: "server closed the connection during registration".to_string(),
                },
            };
            let _ = ready.send(Err(error));
            return;
        }

        match result {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::Disconnected) => {
                warn!("IRC server closed the connection");
                backoff = irc_backoff();
            }
            Err(e) => error!("IRC connection error: {}", e),
        }

        let delay = backoff.next().unwrap_or(Duration::from_secs(300));
        warn!("Reconnecting to IRC in {:.1}s...", delay.as_secs_f64());
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    info!("IRC task ended");
}

async fn run_session<S>(
    shared: &Shared,
    mut connection: Framed<S, IrcCodec>,
    outbound: &mut mpsc::UnboundedReceiver<IrcLine>,
    ready: &mut Option<oneshot::Sender<Result<(), PierError>>>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<SessionEnd, PierError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let settings = &shared.settings;
    let mut nick = settings.nickname.clone();
    let mut registered = false;
    let mut roster = Roster::default();

    if let Some(password) = &settings.password {
        connection.send(IrcLine::new("PASS", [password.as_str()])).await?;
    }
    connection.send(IrcLine::new("NICK", [nick.as_str()])).await?;
    connection
        .send(IrcLine::new(
            "USER",
            [settings.username.as_str(), "0", "*", settings.realname.as_str()],
        ))
        .await?;

    loop {
        tokio::select! {
            line = connection.next() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => return Err(e),
                    None => return Ok(SessionEnd::Disconnected),
                };

                for announcement in track_membership(&line, &nick, &mut roster, settings) {
                    if !shared.bridge.submit(announcement) {
                        debug!("Bridge is gone, dropping IRC announcement");
                    }
                }

                match line.command.as_str() {
                    "PING" => {
                        connection.send(IrcLine::new("PONG", line.params)).await?;
                    }
                    // RPL_WELCOME
                    "001" => {
                        registered = true;
                        if let Some(assigned) = line.param(0) {
                            nick = assigned.to_string();
                        }
                        info!("Registered with IRC server as {}", nick);

                        for command in &settings.init_commands {
                            match IrcLine::parse(command) {
                                Some(command) => connection.send(command).await?,
                                None => warn!("Skipping empty IRC init command"),
                            }
                        }
                        for channel in &shared.channels {
                            connection.send(IrcLine::new("JOIN", [channel.as_str()])).await?;
                        }
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Ok(()));
                        }
                    }
                    // ERR_NICKNAMEINUSE
                    "433" if !registered => {
                        nick.push('_');
                        warn!("Nickname in use, trying {}", nick);
                        connection.send(IrcLine::new("NICK", [nick.as_str()])).await?;
                    }
                    "NICK" if line.source_nick() == Some(nick.as_str()) => {
                        if let Some(new_nick) = line.param(0) {
                            nick = new_nick.to_string();
                        }
                    }
                    "PRIVMSG" => {
                        if let Some(message) = inbound_message(&line, &nick) {
                            if !shared.bridge.submit(message) {
                                debug!("Bridge is gone, dropping IRC message");
                            }
                        }
                    }
                    "ERROR" => {
                        warn!("IRC server error: {}", line.param(0).unwrap_or_default());
                        return Ok(SessionEnd::Disconnected);
                    }
                    _ => {}
                }
            }

            Some(line) = outbound.recv(), if registered => {
                connection.send(line).await?;
            }

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Disconnecting from IRC...");
                    connection.send(IrcLine::new("QUIT", [QUIT_MESSAGE])).await.ok();
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }
}
