use super::Publisher;
use crate::error::PublishError;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, Outgoing, QoS, Transport, TlsConfiguration};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

const DEFAULT_PORT_TLS_ALPN: u16 = 443;
const DEFAULT_PORT_PLAIN_TLS: u16 = 8883;
const DEFAULT_KEEP_ALIVE_SECS: u64 = 1200;
const RETRY_BUDGET: Duration = Duration::from_secs(60);
const ALPN_PROTOCOL: &[u8] = b"x-amzn-mqtt-ca";

/// Mutual-TLS connection parameters for a broker endpoint: client cert +
/// private key + root CA, a stable client id, and a port that defaults to 443
/// with ALPN when no override is given, falling back to 8883 otherwise.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub endpoint: String,
    pub client_id: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: PathBuf,
    pub port: Option<u16>,
    pub clean_session: bool,
    pub keep_alive_secs: u64,
}

impl MqttConfig {
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        ca_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_path: ca_path.into(),
            port: None,
            clean_session: false,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        }
    }

    fn resolved_port(&self) -> u16 {
        self.port
            .unwrap_or(if self.use_alpn() { DEFAULT_PORT_TLS_ALPN } else { DEFAULT_PORT_PLAIN_TLS })
    }

    fn use_alpn(&self) -> bool {
        self.port.is_none() || self.port == Some(DEFAULT_PORT_TLS_ALPN)
    }
}

/// Correlates in-flight publishes with the broker's PUBACKs. `rumqttc` assigns
/// a packet id only once a queued publish is actually written to the wire (the
/// `Outgoing::Publish(pkid)` event), so a sender is first parked in
/// `awaiting_pkid` in send-call order and only keyed by `pkid` once that
/// assignment is observed; `Incoming::PubAck` then resolves it.
#[derive(Default)]
struct PendingAcks {
    awaiting_pkid: VecDeque<oneshot::Sender<()>>,
    by_pkid: HashMap<u16, oneshot::Sender<()>>,
}

impl PendingAcks {
    fn clear(&mut self) {
        self.awaiting_pkid.clear();
        self.by_pkid.clear();
    }
}

struct Connection {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    pending: Arc<StdMutex<PendingAcks>>,
    poller: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

/// MQTT-over-mutual-TLS publisher with lazy reconnect and bounded exponential backoff.
///
/// The live connection lives behind a mutex rather than on the struct directly so a
/// `Mqtt` reconstructed from a swarm snapshot (which never serializes this type)
/// always starts with `conn == None` and reconnects on the first `send`.
pub struct Mqtt {
    config: MqttConfig,
    conn: Mutex<Option<Connection>>,
}

impl Mqtt {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    fn build_options(&self) -> Result<MqttOptions, PublishError> {
        let mut opts = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.endpoint.clone(),
            self.config.resolved_port(),
        );
        opts.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        opts.set_clean_session(self.config.clean_session);

        let ca = std::fs::read(&self.config.ca_path)?;
        let cert = std::fs::read(&self.config.cert_path)?;
        let key = std::fs::read(&self.config.key_path)?;
        let alpn = if self.config.use_alpn() {
            Some(vec![ALPN_PROTOCOL.to_vec()])
        } else {
            None
        };
        opts.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn,
            client_auth: Some((cert, key)),
        }));

        Ok(opts)
    }

    fn spawn_connection(&self) -> Result<Connection, PublishError> {
        let opts = self.build_options()?;
        let (client, mut eventloop) = AsyncClient::new(opts, 64);
        let connected = Arc::new(AtomicBool::new(false));
        let connected_for_task = connected.clone();
        let pending = Arc::new(StdMutex::new(PendingAcks::default()));
        let pending_for_task = pending.clone();

        let poller = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        connected_for_task.store(true, Ordering::Relaxed);
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        connected_for_task.store(false, Ordering::Relaxed);
                        pending_for_task
                            .lock()
                            .expect("pending-ack mutex poisoned")
                            .clear();
                    }
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        let mut guard =
                            pending_for_task.lock().expect("pending-ack mutex poisoned");
                        if let Some(tx) = guard.awaiting_pkid.pop_front() {
                            guard.by_pkid.insert(pkid, tx);
                        }
                    }
                    Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                        let mut guard =
                            pending_for_task.lock().expect("pending-ack mutex poisoned");
                        if let Some(tx) = guard.by_pkid.remove(&ack.pkid) {
                            let _ = tx.send(());
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "mqtt event loop error");
                        connected_for_task.store(false, Ordering::Relaxed);
                        pending_for_task
                            .lock()
                            .expect("pending-ack mutex poisoned")
                            .clear();
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        });

        Ok(Connection {
            client,
            connected,
            pending,
            poller,
        })
    }

    /// Returns a client known to be (or to have just become) connected, plus the
    /// ack-tracking map its event-loop poller feeds, reconnecting under the
    /// shared retry budget if necessary.
    async fn connected_client(
        &self,
        deadline: Instant,
    ) -> Result<(AsyncClient, Arc<StdMutex<PendingAcks>>), PublishError> {
        let mut guard = self.conn.lock().await;
        if let Some(existing) = guard.as_ref() {
            if existing.connected.load(Ordering::Relaxed) {
                return Ok((existing.client.clone(), existing.pending.clone()));
            }
        }

        let mut backoff = Duration::from_millis(200);
        loop {
            match self.spawn_connection() {
                Ok(conn) => {
                    let client = conn.client.clone();
                    let pending = conn.pending.clone();
                    *guard = Some(conn);
                    return Ok((client, pending));
                }
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(err);
                    }
                    tracing::warn!(error = %err, "mqtt connect failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(10));
                }
            }
        }
    }
}

#[async_trait]
impl Publisher for Mqtt {
    async fn send(&self, payload: &[u8], topic: &str) -> Result<bool, PublishError> {
        let deadline = Instant::now() + RETRY_BUDGET;
        let mut backoff = Duration::from_millis(200);

        loop {
            let (client, pending) = match self.connected_client(deadline).await {
                Ok(pair) => pair,
                Err(_) if Instant::now() >= deadline => return Ok(false),
                Err(err) => return Err(err),
            };

            let (tx, rx) = oneshot::channel();
            pending
                .lock()
                .expect("pending-ack mutex poisoned")
                .awaiting_pkid
                .push_back(tx);

            match client
                .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
                .await
            {
                Ok(()) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(remaining, rx).await {
                        Ok(Ok(())) => return Ok(true),
                        _ => {
                            if Instant::now() >= deadline {
                                tracing::warn!(topic, "mqtt publish never acked, retry budget exhausted");
                                return Ok(false);
                            }
                            tracing::debug!(topic, "mqtt publish not acked, retrying");
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(Duration::from_secs(10));
                        }
                    }
                }
                Err(err) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(error = %err, topic, "mqtt publish exhausted retry budget");
                        return Ok(false);
                    }
                    tracing::debug!(error = %err, topic, "mqtt publish failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(10));
                }
            }
        }
    }
}
