// MIT License - Copyright (c) 2026 Peter Wright

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::PanelConfig;
use crate::constants::{MSG_SERIAL_REQUEST, SERIAL_PARTITION_COMMAND, SERIAL_ZONE_COMMAND};
use crate::devices::partition::Partition;
use crate::devices::zone::Zone;
use crate::error::{ParadoxError, Result};
use crate::event::{EventReceiver, EventSender, PanelEvent, event_channel};
use crate::login::{LoginStateMachine, PanelInfo};
use crate::memory::PanelDataReader;
use crate::protocol::{self, ArmMode, PartitionAction, RequestType, ZoneAction};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::transport::{Communicator, DirectTcpTransport};

/// The main public API for one panel connection.
///
/// # Example
///
/// ```no_run
/// use paradox_lan_bridge::{ArmMode, PanelConfig, PanelType, ParadoxPanel};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = PanelConfig::builder()
///         .panel_type(PanelType::Evo192)
///         .panel_ip("192.168.1.100")
///         .panel_password("paradox")
///         .pc_password("1234")
///         .build();
///
///     let mut panel = ParadoxPanel::connect(config).await?;
///
///     let mut events = panel.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("Event: {:?}", event);
///         }
///     });
///
///     panel.arm_partition(1, ArmMode::Regular).await?;
///
///     tokio::signal::ctrl_c().await?;
///     panel.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct ParadoxPanel {
    config: PanelConfig,
    comm: Arc<Communicator>,
    reader: Arc<PanelDataReader>,
    event_tx: EventSender,
    zones: Arc<RwLock<Vec<Zone>>>,
    partitions: Arc<RwLock<Vec<Partition>>>,
    panel_info: Option<PanelInfo>,
    refresh_handle: Option<crate::scheduler::ScheduledHandle>,
}

impl std::fmt::Debug for ParadoxPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParadoxPanel")
            .field("config", &self.config)
            .field("panel_info", &self.panel_info)
            .finish_non_exhaustive()
    }
}

impl ParadoxPanel {
    /// Connect with the stock tokio scheduler.
    pub async fn connect(config: PanelConfig) -> Result<Self> {
        Self::connect_with_scheduler(config, Arc::new(TokioScheduler)).await
    }

    /// Connect, log on, seed the memory map, and register the periodic
    /// refresh on the supplied scheduler.
    ///
    /// Transient failures (timeouts, disconnects, I/O errors) are retried
    /// with exponential backoff; logon refusals are not.
    pub async fn connect_with_scheduler(
        config: PanelConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        let max_retries = config.max_connect_retries;
        let base_delay_ms = config.reconnect_delay_ms;

        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay_ms = base_delay_ms * (1 << (attempt - 1).min(4));
                warn!(
                    "Connection attempt {} failed, retrying in {:.1}s...",
                    attempt,
                    delay_ms as f64 / 1000.0
                );
                sleep(Duration::from_millis(delay_ms)).await;
            }

            match Self::try_connect(config.clone(), scheduler.clone()).await {
                Ok(panel) => return Ok(panel),
                Err(e) => {
                    if !e.is_retryable() || attempt == max_retries {
                        return Err(e);
                    }
                    warn!("Connection error (attempt {}): {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ParadoxError::Disconnected))
    }

    /// Single connection attempt without retries.
    async fn try_connect(config: PanelConfig, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        let (event_tx, _event_rx) = event_channel(256);

        let transport = DirectTcpTransport::connect(
            &config.panel_ip,
            config.panel_port,
            config.socket_timeout_ms,
        )
        .await?;
        let comm = Arc::new(Communicator::new(
            transport,
            config.encrypted,
            &config.panel_password,
            event_tx.clone(),
        ));

        let reader = Arc::new(PanelDataReader::new(config.panel_type.max_zones()));

        let mut machine =
            LoginStateMachine::new(&config.panel_password, config.pc_password_bytes());
        let reader_for_load = reader.clone();
        let comm_for_load = comm.clone();
        machine
            .run(&comm, move || async move {
                reader_for_load.load_all(&comm_for_load).await
            })
            .await?;
        let panel_info = machine.panel_info().cloned();
        let _ = event_tx.send(PanelEvent::Connected);

        // Device state from the freshly seeded memory map
        let mut zones: Vec<Zone> = (1..=config.panel_type.max_zones()).map(Zone::new).collect();
        if let Some(statuses) = reader.zone_statuses().await {
            for (zone, status) in zones.iter_mut().zip(statuses) {
                zone.update_status(status);
            }
        }

        let mut partitions: Vec<Partition> = (1..=config.panel_type.max_partitions())
            .map(Partition::new)
            .collect();
        if let Some(statuses) = reader.partition_statuses().await {
            for (partition, status) in partitions.iter_mut().zip(statuses) {
                partition.update_status(status);
            }
        }
        // Partition labels are few; fetch them up front. Zone labels are
        // read lazily through `zone_label`.
        for partition in &mut partitions {
            match reader.partition_label(&comm, partition.id).await {
                Ok(label) => partition.label = label,
                Err(e) => debug!("Partition {} label unavailable: {}", partition.id, e),
            }
        }

        let zones = Arc::new(RwLock::new(zones));
        let partitions = Arc::new(RwLock::new(partitions));

        let refresh_handle = {
            let comm = comm.clone();
            let reader = reader.clone();
            let zones = zones.clone();
            let partitions = partitions.clone();
            let event_tx = event_tx.clone();
            scheduler.run_periodically(
                Duration::from_millis(config.refresh_interval_ms),
                Box::new(move || {
                    let comm = comm.clone();
                    let reader = reader.clone();
                    let zones = zones.clone();
                    let partitions = partitions.clone();
                    let event_tx = event_tx.clone();
                    Box::pin(async move {
                        refresh_cycle(&comm, &reader, &zones, &partitions, &event_tx).await;
                    })
                }),
            )
        };

        info!(
            "Panel ready: {} ({} zones, {} partitions)",
            config.panel_type.as_str(),
            config.panel_type.max_zones(),
            config.panel_type.max_partitions()
        );

        Ok(Self {
            config,
            comm,
            reader,
            event_tx,
            zones,
            partitions,
            panel_info,
            refresh_handle: Some(refresh_handle),
        })
    }

    /// Subscribe to panel events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    /// Current zone snapshots.
    pub async fn zones(&self) -> Vec<Zone> {
        self.zones.read().await.clone()
    }

    /// Current partition snapshots.
    pub async fn partitions(&self) -> Vec<Partition> {
        self.partitions.read().await.clone()
    }

    /// Identity captured during the handshake.
    pub fn panel_info(&self) -> Option<&PanelInfo> {
        self.panel_info.as_ref()
    }

    pub fn is_online(&self) -> bool {
        self.comm.is_online()
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    /// Arm a partition.
    pub async fn arm_partition(&self, id: u8, mode: ArmMode) -> Result<()> {
        self.partition_command(id, PartitionAction::Arm(mode)).await
    }

    /// Disarm a partition.
    pub async fn disarm_partition(&self, id: u8) -> Result<()> {
        self.partition_command(id, PartitionAction::Disarm).await
    }

    async fn partition_command(&self, id: u8, action: PartitionAction) -> Result<()> {
        let max = self.config.panel_type.max_partitions();
        if id == 0 || id > max {
            return Err(ParadoxError::InvalidDeviceId {
                id: id as u32,
                max: max as u32,
            });
        }
        if !self.comm.is_online() {
            return Err(ParadoxError::Offline);
        }

        let packet = protocol::partition_command_packet(id, action);
        let frame = self
            .comm
            .encode(SERIAL_PARTITION_COMMAND, MSG_SERIAL_REQUEST, &packet)
            .await;
        let response = self
            .comm
            .roundtrip(RequestType::PartitionCommand, frame)
            .await?;
        if !response.is_matched() {
            return Err(ParadoxError::GarbledReceive {
                details: format!("partition {} command not acknowledged", id),
            });
        }
        debug!("Partition {} {:?} acknowledged", id, action);
        Ok(())
    }

    /// Bypass a zone.
    pub async fn bypass_zone(&self, id: u16) -> Result<()> {
        self.zone_command(id, ZoneAction::Bypass).await
    }

    /// Clear a zone bypass.
    pub async fn clear_bypass_zone(&self, id: u16) -> Result<()> {
        self.zone_command(id, ZoneAction::ClearBypass).await
    }

    async fn zone_command(&self, id: u16, action: ZoneAction) -> Result<()> {
        let max = self.config.panel_type.max_zones();
        if id == 0 || id > max {
            return Err(ParadoxError::InvalidDeviceId {
                id: id as u32,
                max: max as u32,
            });
        }
        if !self.comm.is_online() {
            return Err(ParadoxError::Offline);
        }

        let packet = protocol::zone_command_packet(id, action);
        let frame = self
            .comm
            .encode(SERIAL_ZONE_COMMAND, MSG_SERIAL_REQUEST, &packet)
            .await;
        let response = self.comm.roundtrip(RequestType::ZoneCommand, frame).await?;
        if !response.is_matched() {
            return Err(ParadoxError::GarbledReceive {
                details: format!("zone {} command not acknowledged", id),
            });
        }
        debug!("Zone {} {:?} acknowledged", id, action);
        Ok(())
    }

    /// Zone label from EEPROM (cached after the first read).
    pub async fn zone_label(&self, id: u16) -> Result<String> {
        let max = self.config.panel_type.max_zones();
        if id == 0 || id > max {
            return Err(ParadoxError::InvalidDeviceId {
                id: id as u32,
                max: max as u32,
            });
        }
        self.reader.zone_label(&self.comm, id).await
    }

    /// Trigger a memory refresh outside the periodic schedule.
    pub async fn refresh_now(&self) {
        refresh_cycle(
            &self.comm,
            &self.reader,
            &self.zones,
            &self.partitions,
            &self.event_tx,
        )
        .await;
    }

    /// Stop the refresh schedule and tear the connection down.
    pub async fn disconnect(&mut self) {
        info!("Disconnecting from panel");
        self.refresh_handle.take();
        self.comm.set_online(false);
        self.reader.reset().await;
        self.comm.shutdown().await;
    }
}

/// One refresh pass: re-read RAM, decode, diff against the cached device
/// state, and push changes to subscribers.
async fn refresh_cycle(
    comm: &Communicator,
    reader: &PanelDataReader,
    zones: &RwLock<Vec<Zone>>,
    partitions: &RwLock<Vec<Partition>>,
    event_tx: &EventSender,
) {
    if let Err(e) = reader.refresh(comm).await {
        warn!("Memory refresh failed: {}", e);
        return;
    }

    if let Some(statuses) = reader.zone_statuses().await {
        let mut zones = zones.write().await;
        for (zone, status) in zones.iter_mut().zip(statuses) {
            let old_status = zone.status;
            let changed = zone.update_status(status);
            if !changed.is_empty() {
                let _ = event_tx.send(PanelEvent::ZoneStatusChanged {
                    zone_id: zone.id,
                    old_status,
                    new_status: zone.status,
                    changed,
                });
            }
        }
    }

    if let Some(statuses) = reader.partition_statuses().await {
        let mut partitions = partitions.write().await;
        for (partition, status) in partitions.iter_mut().zip(statuses) {
            let old_status = partition.status;
            let changed = partition.update_status(status);
            if !changed.is_empty() {
                let _ = event_tx.send(PanelEvent::PartitionStatusChanged {
                    partition_id: partition.id,
                    old_status,
                    new_status: partition.status,
                    changed,
                });
            }
        }
    }
}
