//! Example: Connect to a Paradox panel and print device status.

use paradox_lan_bridge::{PanelConfig, PanelType, ParadoxPanel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PanelConfig::builder()
        .panel_type(PanelType::Evo192)
        .panel_ip("192.168.1.100")
        .panel_port(10000)
        .panel_password("paradox")
        .pc_password("1234")
        .build();

    println!("Connecting to panel...");
    let mut panel = ParadoxPanel::connect(config).await?;

    if let Some(info) = panel.panel_info() {
        println!(
            "Panel: product {:#04X}, firmware {:#04X}, serial {:02X?}",
            info.product_id(),
            info.software_version(),
            info.serial_number()
        );
    }

    let partitions = panel.partitions().await;
    println!("\n--- Partitions ({}) ---", partitions.len());
    for part in &partitions {
        println!(
            "  Partition {}: {:20} armed={} ready={} alarm={}",
            part.id,
            part.label,
            part.is_armed(),
            part.is_ready(),
            part.is_alarm(),
        );
    }

    let zones = panel.zones().await;
    let open: Vec<_> = zones.iter().filter(|z| z.is_open()).collect();
    println!("\n--- Open zones ({} of {}) ---", open.len(), zones.len());
    for zone in open {
        let label = panel.zone_label(zone.id).await.unwrap_or_default();
        println!("  Zone {:3}: {}", zone.id, label);
    }

    panel.disconnect().await;
    Ok(())
}
