//! Example: Arm and disarm a partition, watching the resulting events.

use std::time::Duration;

use paradox_lan_bridge::{ArmMode, PanelConfig, PanelEvent, PanelType, ParadoxPanel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PanelConfig::builder()
        .panel_type(PanelType::Evo192)
        .panel_ip("192.168.1.100")
        .panel_password("paradox")
        .pc_password("1234")
        .build();

    let mut panel = ParadoxPanel::connect(config).await?;

    let mut events = panel.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let PanelEvent::PartitionStatusChanged {
                partition_id,
                changed,
                ..
            } = event
            {
                println!("Partition {} changed: {:?}", partition_id, changed);
            }
        }
    });

    println!("Arming partition 1 (stay)...");
    panel.arm_partition(1, ArmMode::Stay).await?;
    tokio::time::sleep(Duration::from_secs(10)).await;

    println!("Disarming partition 1...");
    panel.disarm_partition(1).await?;
    tokio::time::sleep(Duration::from_secs(2)).await;

    panel.disconnect().await;
    Ok(())
}
