// MIT License - Copyright (c) 2026 Peter Wright

//! # paradox-lan-bridge
//!
//! Direct TCP/IP communication with Paradox EVO alarm control panels
//! (EVO48, EVO96, EVO192) through their IP module.
//!
//! The library speaks the module's binary protocol end to end: the
//! multi-step logon handshake with its rolling session key, strict
//! one-request-at-a-time traffic over a single socket, and the paged
//! RAM / windowed EEPROM reads that zone and partition state is decoded
//! from. No cloud service is involved.
//!
//! ## Quick Start
//!
//! ```no_run
//! use paradox_lan_bridge::{ArmMode, PanelConfig, PanelType, ParadoxPanel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PanelConfig::builder()
//!         .panel_type(PanelType::Evo192)
//!         .panel_ip("192.168.1.100")
//!         .panel_password("paradox")
//!         .pc_password("1234")
//!         .build();
//!
//!     let mut panel = ParadoxPanel::connect(config).await?;
//!
//!     let mut events = panel.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     panel.arm_partition(1, ArmMode::Regular).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     panel.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod crypto;
pub mod devices;
pub mod error;
pub mod event;
pub mod login;
pub mod memory;
pub mod panel;
pub mod protocol;
pub mod queue;
pub mod scheduler;
pub mod transport;

// Re-exports for convenience
pub use config::{PanelConfig, PanelConfigBuilder, PanelType};
pub use devices::partition::{Partition, PartitionStatusFlags};
pub use devices::zone::{Zone, ZoneStatusFlags};
pub use error::{LogonFailure, ParadoxError, Result};
pub use event::{EventReceiver, PanelEvent};
pub use login::{LoginPhase, LoginStateMachine, PanelInfo};
pub use memory::{MemoryMap, PanelDataReader};
pub use panel::ParadoxPanel;
pub use protocol::{ArmMode, PartitionAction, RequestType, ZoneAction};
pub use scheduler::{Scheduler, TokioScheduler};
