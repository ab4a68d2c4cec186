//! One simulated sensor node and its publish cycle loop.

use crate::adapter::{AdapterInput, PayloadAdapter};
use crate::config::DeviceConfig;
use crate::datasource::DataSource;
use crate::error::DeviceError;
use crate::publisher::Publisher;
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Asked by a device after every successful publish; the concrete implementation
/// lives on [`crate::swarm::Swarm`], which is the only thing that can see every
/// device's current cycle at once.
#[async_trait]
pub trait SnapshotRequester: Send + Sync {
    async fn request_snapshot(&self);
}

/// A read-only view of one device's identity and live cycle counter, shared with
/// the swarm-level snapshot writer without requiring the writer to own the device.
#[derive(Clone)]
pub struct DeviceView {
    pub config: DeviceConfig,
    pub cycle: Arc<AtomicU64>,
}

/// Owns an identity, a [`DataSource`], a [`Publisher`], an [`PayloadAdapter`], and a
/// cycle counter. `cycle` is the only field any other task may read (via
/// [`DeviceView`]); it is the only field this device's own task ever writes.
pub struct Device {
    config: DeviceConfig,
    cycle: Arc<AtomicU64>,
    data_source: Arc<dyn DataSource>,
    publisher: Arc<dyn Publisher>,
    adapter: Arc<dyn PayloadAdapter>,
}

impl Device {
    pub fn new(
        config: DeviceConfig,
        data_source: Arc<dyn DataSource>,
        publisher: Arc<dyn Publisher>,
        adapter: Arc<dyn PayloadAdapter>,
    ) -> Self {
        Self::resume(config, 0, data_source, publisher, adapter)
    }

    /// Reconstructs a device at a prior cycle count, as done after a snapshot load.
    pub fn resume(
        config: DeviceConfig,
        cycle: u64,
        data_source: Arc<dyn DataSource>,
        publisher: Arc<dyn Publisher>,
        adapter: Arc<dyn PayloadAdapter>,
    ) -> Self {
        Self {
            config,
            cycle: Arc::new(AtomicU64::new(cycle)),
            data_source,
            publisher,
            adapter,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::Relaxed)
    }

    pub fn view(&self) -> DeviceView {
        DeviceView {
            config: self.config.clone(),
            cycle: self.cycle.clone(),
        }
    }

    /// Runs the publish cycle loop until `max_cycles` is reached, `cancel` fires, or
    /// an [`AdapterError`](crate::error::AdapterError) (a programming error) is hit.
    /// Data-source and publish failures are logged and absorbed: the device treats
    /// them as "no payload this cycle" and keeps going.
    pub async fn run(
        &self,
        swarm_name: &str,
        cancel: &CancellationToken,
        snapshot: Option<&(dyn SnapshotRequester)>,
    ) -> Result<(), DeviceError> {
        let device_id = self.config.device_id.clone();
        let mut first_iteration = true;

        loop {
            if first_iteration && self.config.delay_start {
                let delay_secs = random_delay(self.config.sleep_seconds);
                if self.sleep_or_cancel(Duration::from_secs(delay_secs), cancel).await {
                    return Err(DeviceError::Cancelled);
                }
            }
            first_iteration = false;

            if cancel.is_cancelled() {
                return Err(DeviceError::Cancelled);
            }

            let cycle = self.cycle.load(Ordering::Relaxed);
            if self.config.max_cycles > 0 && cycle >= self.config.max_cycles {
                return Ok(());
            }

            let row = match self
                .data_source
                .latest_for_site(&device_id, self.config.table, cycle)
                .await
            {
                Ok(row) => row,
                Err(err) => {
                    tracing::warn!(
                        swarm = swarm_name,
                        device = %device_id,
                        cycle,
                        error = %err,
                        "data source error, treating as no data"
                    );
                    None
                }
            };

            let Some(row) = row else {
                tracing::info!(swarm = swarm_name, device = %device_id, cycle, "No data found");
                if self
                    .sleep_or_cancel(Duration::from_secs(self.config.sleep_seconds), cancel)
                    .await
                {
                    return Err(DeviceError::Cancelled);
                }
                continue;
            };

            if draw_skip(self.config.no_send_probability) {
                tracing::debug!(swarm = swarm_name, device = %device_id, cycle, "skipping publish this cycle");
                if self
                    .sleep_or_cancel(Duration::from_secs(self.config.sleep_seconds), cancel)
                    .await
                {
                    return Err(DeviceError::Cancelled);
                }
                continue;
            }

            let payload = self.adapter.adapt(AdapterInput::Row(row), &device_id)?;
            let topic = self.config.topic();

            let published = match self.publisher.send(&payload, &topic).await {
                Ok(published) => published,
                Err(err) => {
                    tracing::warn!(
                        swarm = swarm_name,
                        device = %device_id,
                        cycle,
                        error = %err,
                        "publish error, treating as no publish"
                    );
                    false
                }
            };

            if published {
                let new_cycle = self.cycle.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::info!(swarm = swarm_name, device = %device_id, cycle = new_cycle, "published");
                if let Some(snapshot) = snapshot {
                    snapshot.request_snapshot().await;
                }
            }

            if self
                .sleep_or_cancel(Duration::from_secs(self.config.sleep_seconds), cancel)
                .await
            {
                return Err(DeviceError::Cancelled);
            }
        }
    }

    async fn sleep_or_cancel(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = cancel.cancelled() => true,
        }
    }
}

/// Prints only fields that differ from their construction default, so a swarm
/// of many devices doesn't flood the logs with boilerplate.
impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Device");
        s.field("device_id", &self.config.device_id);
        s.field("cycle", &self.cycle());
        if self.config.sleep_seconds != 0 {
            s.field("sleep_seconds", &self.config.sleep_seconds);
        }
        if self.config.max_cycles != 0 {
            s.field("max_cycles", &self.config.max_cycles);
        }
        if self.config.delay_start {
            s.field("delay_start", &self.config.delay_start);
        }
        if let Some(table) = self.config.table {
            s.field("table", &table);
        }
        if let Some(topic) = &self.config.mqtt_topic {
            s.field("mqtt_topic", topic);
        }
        if self.config.no_send_probability != 0 {
            s.field("no_send_probability", &self.config.no_send_probability);
        }
        s.finish()
    }
}

/// Two devices are equal iff their configuration and current cycle match. The
/// `DataSource`/`Publisher`/`Adapter` handles are intentionally excluded - once
/// connected they aren't comparable, and a snapshot round-trip only needs
/// config + cycle to agree.
impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.config == other.config && self.cycle() == other.cycle()
    }
}

/// Bernoulli draw with success probability `no_send_probability / 100`.
fn draw_skip(no_send_probability: u8) -> bool {
    no_send_probability > 0 && rand::thread_rng().gen_bool(no_send_probability as f64 / 100.0)
}

fn random_delay(max_inclusive: u64) -> u64 {
    if max_inclusive == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=max_inclusive)
    }
}
