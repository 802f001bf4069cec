// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use paradox_lan_bridge::{
    ArmMode, PanelConfig, PanelEvent, PanelType, ParadoxPanel, PartitionStatusFlags,
    ZoneStatusFlags,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "paradox2mqtt")]
#[command(about = "Bridge between a Paradox EVO alarm panel and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    panel: PanelToml,
    mqtt: MqttToml,
}

#[derive(Debug, Deserialize)]
struct PanelToml {
    #[serde(default = "default_panel_type")]
    panel_type: String,
    panel_ip: String,
    #[serde(default = "default_panel_port")]
    panel_port: u16,
    #[serde(default = "default_panel_password")]
    panel_password: String,
    #[serde(default = "default_pc_password")]
    pc_password: String,
    #[serde(default = "default_encrypted")]
    encrypted: bool,
    #[serde(default = "default_refresh_interval")]
    refresh_interval_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    reconnect_delay_ms: u64,
    #[serde(default = "default_socket_timeout")]
    socket_timeout_ms: u64,
}

fn default_panel_type() -> String {
    "EVO192".to_string()
}
fn default_panel_port() -> u16 {
    10000
}
fn default_panel_password() -> String {
    "paradox".to_string()
}
fn default_pc_password() -> String {
    "0000".to_string()
}
fn default_encrypted() -> bool {
    true
}
fn default_refresh_interval() -> u64 {
    5000
}
fn default_reconnect_delay() -> u64 {
    10000
}
fn default_socket_timeout() -> u64 {
    4000
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
    #[serde(default = "default_snapshot_interval")]
    snapshot_interval_secs: u64,
}

fn default_client_id() -> String {
    "paradox-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "paradox/cmd".to_string()
}
fn default_publish_topic() -> String {
    "paradox".to_string()
}
fn default_snapshot_interval() -> u64 {
    60
}

fn build_panel_config(toml: &PanelToml) -> Result<PanelConfig> {
    let panel_type = PanelType::from_name(&toml.panel_type)
        .with_context(|| format!("Unknown panel type: {}", toml.panel_type))?;
    Ok(PanelConfig::builder()
        .panel_type(panel_type)
        .panel_ip(&toml.panel_ip)
        .panel_port(toml.panel_port)
        .panel_password(&toml.panel_password)
        .pc_password(&toml.pc_password)
        .encrypted(toml.encrypted)
        .refresh_interval_ms(toml.refresh_interval_ms)
        .reconnect_delay_ms(toml.reconnect_delay_ms)
        .socket_timeout_ms(toml.socket_timeout_ms)
        .build())
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MqttSnapshot {
    now: u64,
    op: String,
    state: MqttSnapshotState,
}

#[derive(Serialize)]
struct MqttSnapshotState {
    parts: Vec<MqttPartitionState>,
    zones: Vec<MqttZoneState>,
}

#[derive(Serialize)]
struct MqttZoneState {
    id: u16,
    name: String,
    open: bool,
    tamper: bool,
    #[serde(rename = "lowBattery")]
    low_battery: bool,
}

#[derive(Serialize)]
struct MqttPartitionState {
    id: u8,
    name: String,
    armed: bool,
    ready: bool,
    alarm: bool,
    trouble: bool,
}

#[derive(Serialize)]
struct MqttDeviceEvent {
    now: u64,
    op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    zone: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    partition: Option<u8>,
}

#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct MqttSimpleEvent {
    now: u64,
    op: String,
}

/// Inbound command (subscribed)
#[derive(Deserialize)]
struct MqttCommand {
    op: String,
    #[serde(default)]
    zone: Option<u16>,
    #[serde(default)]
    partition: Option<u8>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_zone_event(client: &AsyncClient, topic: &str, op: &str, zone_id: u16) {
    let msg = MqttDeviceEvent {
        now: now_epoch_ms(),
        op: op.to_string(),
        zone: Some(zone_id),
        partition: None,
    };
    publish_json(client, topic, &msg, false).await;
}

async fn publish_partition_event(client: &AsyncClient, topic: &str, op: &str, partition_id: u8) {
    let msg = MqttDeviceEvent {
        now: now_epoch_ms(),
        op: op.to_string(),
        zone: None,
        partition: Some(partition_id),
    };
    publish_json(client, topic, &msg, false).await;
}

async fn publish_simple_event(client: &AsyncClient, topic: &str, op: &str) {
    let msg = MqttSimpleEvent {
        now: now_epoch_ms(),
        op: op.to_string(),
    };
    publish_json(client, topic, &msg, false).await;
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    success: bool,
    src: Option<serde_json::Value>,
) {
    let msg = MqttCmdAck {
        now: now_epoch_ms(),
        op: "CMD_ACK".to_string(),
        success,
        src,
    };
    publish_json(client, topic, &msg, false).await;
}

async fn publish_snapshot(client: &AsyncClient, topic: &str, panel: &ParadoxPanel) {
    let zones: Vec<MqttZoneState> = panel
        .zones()
        .await
        .iter()
        .map(|z| MqttZoneState {
            id: z.id,
            name: if z.label.is_empty() {
                format!("Zone {}", z.id)
            } else {
                z.label.clone()
            },
            open: z.is_open(),
            tamper: z.is_tamper(),
            low_battery: z.is_low_battery(),
        })
        .collect();

    let parts: Vec<MqttPartitionState> = panel
        .partitions()
        .await
        .iter()
        .map(|p| MqttPartitionState {
            id: p.id,
            name: if p.label.is_empty() {
                format!("Partition {}", p.id)
            } else {
                p.label.clone()
            },
            armed: p.is_armed(),
            ready: p.is_ready(),
            alarm: p.is_alarm(),
            trouble: p.is_trouble(),
        })
        .collect();

    let snapshot = MqttSnapshot {
        now: now_epoch_ms(),
        op: "SNAPSHOT".to_string(),
        state: MqttSnapshotState { parts, zones },
    };
    publish_json(client, topic, &snapshot, true).await;
}

// ---------------------------------------------------------------------------
// Panel event → MQTT
// ---------------------------------------------------------------------------

async fn handle_panel_event(event: PanelEvent, client: &AsyncClient, topic: &str) {
    match event {
        PanelEvent::ZoneStatusChanged {
            zone_id,
            new_status,
            changed,
            ..
        } => {
            let became_set = changed & new_status;
            let became_unset = changed & !new_status;

            if became_set.contains(ZoneStatusFlags::OPEN) {
                publish_zone_event(client, topic, "ZONE_OPEN", zone_id).await;
            }
            if became_unset.contains(ZoneStatusFlags::OPEN) {
                publish_zone_event(client, topic, "ZONE_CLOSED", zone_id).await;
            }
            if became_set.contains(ZoneStatusFlags::TAMPER) {
                publish_zone_event(client, topic, "ZONE_TAMPER", zone_id).await;
            }
            if became_unset.contains(ZoneStatusFlags::TAMPER) {
                publish_zone_event(client, topic, "ZONE_TAMPER_CLEARED", zone_id).await;
            }
            if became_set.contains(ZoneStatusFlags::LOW_BATTERY) {
                publish_zone_event(client, topic, "ZONE_LOW_BATTERY", zone_id).await;
            }
            if became_unset.contains(ZoneStatusFlags::LOW_BATTERY) {
                publish_zone_event(client, topic, "ZONE_BATTERY_OK", zone_id).await;
            }
        }

        PanelEvent::PartitionStatusChanged {
            partition_id,
            new_status,
            changed,
            ..
        } => {
            let became_set = changed & new_status;
            let became_unset = changed & !new_status;
            let any_armed = PartitionStatusFlags::ARMED
                | PartitionStatusFlags::ARMED_STAY
                | PartitionStatusFlags::ARMED_INSTANT
                | PartitionStatusFlags::ARMED_FORCE;
            let any_alarm = PartitionStatusFlags::ALARM
                | PartitionStatusFlags::AUDIBLE_ALARM
                | PartitionStatusFlags::SILENT_ALARM
                | PartitionStatusFlags::FIRE_ALARM;

            if became_set.intersects(any_armed) {
                publish_partition_event(client, topic, "PARTITION_ARMED", partition_id).await;
            }
            if became_unset.intersects(any_armed) && !new_status.intersects(any_armed) {
                publish_partition_event(client, topic, "PARTITION_DISARMED", partition_id).await;
            }
            if became_set.intersects(any_alarm) {
                publish_partition_event(client, topic, "PARTITION_ALARM", partition_id).await;
            }
            if became_unset.intersects(any_alarm) && !new_status.intersects(any_alarm) {
                publish_partition_event(client, topic, "PARTITION_ALARM_CLEARED", partition_id)
                    .await;
            }
            if became_set.contains(PartitionStatusFlags::READY) {
                publish_partition_event(client, topic, "PARTITION_READY", partition_id).await;
            }
            if became_unset.contains(PartitionStatusFlags::READY) {
                publish_partition_event(client, topic, "PARTITION_NOT_READY", partition_id).await;
            }
            if became_set.contains(PartitionStatusFlags::TROUBLE) {
                publish_partition_event(client, topic, "PARTITION_TROUBLE", partition_id).await;
            }
        }

        PanelEvent::Connected => {
            publish_simple_event(client, topic, "CONNECTED").await;
        }
        PanelEvent::Disconnected => {
            publish_simple_event(client, topic, "DISCONNECTED").await;
        }
        PanelEvent::SocketTimeout => {
            publish_simple_event(client, topic, "SOCKET_TIMEOUT").await;
        }
        PanelEvent::CommunicationFailure { reason } => {
            warn!("Communication failure: {reason}");
            publish_simple_event(client, topic, "COMM_FAILURE").await;
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT command → panel
// ---------------------------------------------------------------------------

async fn handle_command(
    raw: &str,
    cmd: MqttCommand,
    client: &AsyncClient,
    topic: &str,
    panel: &ParadoxPanel,
) {
    let src_json = serde_json::from_str(raw).ok();

    let result = match cmd.op.as_str() {
        "SNAPSHOT" => {
            publish_snapshot(client, topic, panel).await;
            return;
        }
        "ARM" => {
            let id = cmd.partition.unwrap_or(1);
            info!("Command: ARM partition {id}");
            panel.arm_partition(id, ArmMode::Regular).await
        }
        "ARM_STAY" => {
            let id = cmd.partition.unwrap_or(1);
            info!("Command: ARM_STAY partition {id}");
            panel.arm_partition(id, ArmMode::Stay).await
        }
        "ARM_FORCE" => {
            let id = cmd.partition.unwrap_or(1);
            info!("Command: ARM_FORCE partition {id}");
            panel.arm_partition(id, ArmMode::Force).await
        }
        "ARM_INSTANT" => {
            let id = cmd.partition.unwrap_or(1);
            info!("Command: ARM_INSTANT partition {id}");
            panel.arm_partition(id, ArmMode::Instant).await
        }
        "DISARM" => {
            let id = cmd.partition.unwrap_or(1);
            info!("Command: DISARM partition {id}");
            panel.disarm_partition(id).await
        }
        "ZONE_BYPASS_ENABLE" => match cmd.zone {
            Some(id) => {
                info!("Command: ZONE_BYPASS_ENABLE zone {id}");
                panel.bypass_zone(id).await
            }
            None => {
                warn!("ZONE_BYPASS_ENABLE: missing zone");
                publish_cmd_ack(client, topic, false, src_json).await;
                return;
            }
        },
        "ZONE_BYPASS_DISABLE" => match cmd.zone {
            Some(id) => {
                info!("Command: ZONE_BYPASS_DISABLE zone {id}");
                panel.clear_bypass_zone(id).await
            }
            None => {
                warn!("ZONE_BYPASS_DISABLE: missing zone");
                publish_cmd_ack(client, topic, false, src_json).await;
                return;
            }
        },
        other => {
            warn!("Unknown command: {other}");
            publish_cmd_ack(client, topic, false, src_json).await;
            return;
        }
    };

    let success = match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Command {} failed: {e}", cmd.op);
            false
        }
    };
    publish_cmd_ack(client, topic, success, src_json).await;
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or
    // RUST_LOG=paradox_lan_bridge=trace). Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let config_text =
        std::fs::read_to_string(&cli.config).context("Failed to read config file")?;
    let config: Config = toml::from_str(&config_text).context("Failed to parse config file")?;

    let panel_config = build_panel_config(&config.panel)?;
    let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;

    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        info!(
            "Connecting to Paradox panel at {}:{}",
            panel_config.panel_ip, panel_config.panel_port
        );
        let panel = Arc::new(ParadoxPanel::connect(panel_config.clone()).await?);
        info!("Panel connected and initialized");

        let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        client
            .subscribe(&config.mqtt.subscribe_topic, QoS::AtLeastOnce)
            .await
            .context("Failed to subscribe to MQTT topic")?;
        info!("MQTT: subscribed to {}", config.mqtt.subscribe_topic);

        publish_snapshot(&client, &config.mqtt.publish_topic, &panel).await;

        // Raised by the event task when the panel connection drops
        let (disconnect_tx, mut disconnect_rx) = watch::channel(false);

        // Task 1: panel events → MQTT
        let client_events = client.clone();
        let topic_events = config.mqtt.publish_topic.clone();
        let mut event_rx = panel.subscribe();
        let event_handle = tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(PanelEvent::Disconnected) => {
                        publish_simple_event(&client_events, &topic_events, "DISCONNECTED").await;
                        let _ = disconnect_tx.send(true);
                        break;
                    }
                    Ok(event) => {
                        handle_panel_event(event, &client_events, &topic_events).await;
                    }
                    Err(e) => {
                        debug!("Event stream ended: {e}");
                        let _ = disconnect_tx.send(true);
                        break;
                    }
                }
            }
        });

        // Task 2: MQTT event loop (inbound commands + keepalive)
        let panel_cmds = panel.clone();
        let client_cmds = client.clone();
        let topic_cmds = config.mqtt.publish_topic.clone();
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        let payload = String::from_utf8_lossy(&msg.payload).to_string();
                        match serde_json::from_str::<MqttCommand>(&payload) {
                            Ok(cmd) => {
                                info!("MQTT command received: {payload}");
                                handle_command(&payload, cmd, &client_cmds, &topic_cmds, &panel_cmds)
                                    .await;
                            }
                            Err(e) => warn!("Failed to parse MQTT command: {e}"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Task 3: periodic retained snapshot
        let panel_snap = panel.clone();
        let client_snap = client.clone();
        let topic_snap = config.mqtt.publish_topic.clone();
        let snapshot_secs = config.mqtt.snapshot_interval_secs;
        let snap_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(snapshot_secs));
            // The initial snapshot was already published
            ticker.tick().await;
            loop {
                ticker.tick().await;
                panel_snap.refresh_now().await;
                publish_snapshot(&client_snap, &topic_snap, &panel_snap).await;
            }
        });

        info!("MQTT bridge running. Send SIGINT/SIGTERM to stop.");
        let reconnect = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = disconnect_rx.changed() => {
                warn!("Panel connection lost; reconnecting...");
                true
            }
        };

        event_handle.abort();
        mqtt_handle.abort();
        snap_handle.abort();

        if let Some(mut panel) = Arc::into_inner(panel) {
            panel.disconnect().await;
        }

        if !reconnect {
            break;
        }
        tokio::time::sleep(Duration::from_millis(panel_config.reconnect_delay_ms)).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}
