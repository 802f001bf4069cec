// MIT License - Copyright (c) 2026 Peter Wright

//! RAM page cache and EEPROM window reads.
//!
//! Live panel state is reconstructed from fixed-size RAM pages fetched over
//! the serial path and cached locally; zone and partition decoders operate
//! purely on the cached snapshot. EEPROM holds persistent configuration
//! (labels), read as address windows computed from a fixed base and record
//! stride.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::constants::*;
use crate::devices::partition::{self, PartitionStatusFlags};
use crate::devices::zone::{self, ZoneStatusFlags};
use crate::error::{ParadoxError, Result};
use crate::protocol::{self, RequestType};
use crate::transport::Communicator;

/// Ordered list of fixed-size RAM pages. A page is only ever replaced
/// whole; a partially transferred page never lands in the cache.
#[derive(Debug, Default)]
pub struct MemoryMap {
    pages: Vec<Option<Vec<u8>>>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self {
            pages: (0..RAM_PAGE_COUNT).map(|_| None).collect(),
        }
    }

    /// Replace one page atomically. Rejects anything that is not exactly a
    /// page worth of bytes.
    pub fn update_page(&mut self, index: usize, bytes: Vec<u8>) -> Result<()> {
        if index >= RAM_PAGE_COUNT || bytes.len() != RAM_PAGE_SIZE {
            return Err(ParadoxError::GarbledReceive {
                details: format!("page {} update with {} bytes", index, bytes.len()),
            });
        }
        self.pages[index] = Some(bytes);
        Ok(())
    }

    pub fn page(&self, index: usize) -> Option<&[u8]> {
        self.pages.get(index)?.as_deref()
    }

    /// Read an inclusive byte window anchored at `page`. Offsets may run
    /// past the page end; the window then continues into the following
    /// pages. Returns `None` unless every byte of the span is cached -
    /// there are no partial results.
    pub fn read_window(&self, page: usize, start_offset: usize, end_offset: usize) -> Option<Vec<u8>> {
        if end_offset < start_offset {
            return None;
        }
        let abs_start = page * RAM_PAGE_SIZE + start_offset;
        let abs_end = page * RAM_PAGE_SIZE + end_offset;
        let last_page = abs_end / RAM_PAGE_SIZE;
        if last_page >= RAM_PAGE_COUNT {
            return None;
        }

        let mut window = Vec::with_capacity(abs_end - abs_start + 1);
        for page_index in (abs_start / RAM_PAGE_SIZE)..=last_page {
            let bytes = self.page(page_index)?;
            let from = abs_start.saturating_sub(page_index * RAM_PAGE_SIZE);
            let to = (abs_end + 1 - page_index * RAM_PAGE_SIZE).min(RAM_PAGE_SIZE);
            window.extend_from_slice(&bytes[from..to]);
        }
        Some(window)
    }

    /// Drop all cached pages, e.g. on reconnect.
    pub fn clear(&mut self) {
        for page in &mut self.pages {
            *page = None;
        }
    }

    pub fn cached_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.is_some()).count()
    }
}

/// Issues RAM and EEPROM reads over the communicator and decodes panel
/// state from the cached snapshot.
pub struct PanelDataReader {
    memory: Mutex<MemoryMap>,
    zone_labels: Mutex<HashMap<u16, String>>,
    partition_labels: Mutex<HashMap<u8, String>>,
    zone_count: u16,
}

impl PanelDataReader {
    pub fn new(zone_count: u16) -> Self {
        Self {
            memory: Mutex::new(MemoryMap::new()),
            zone_labels: Mutex::new(HashMap::new()),
            partition_labels: Mutex::new(HashMap::new()),
            zone_count,
        }
    }

    /// Fetch every RAM page. Used by the login sequence to seed the cache
    /// before the communicator goes online.
    pub async fn load_all(&self, comm: &Communicator) -> Result<()> {
        for page in 0..RAM_PAGE_COUNT {
            let bytes = self.read_ram_page(comm, page).await?;
            self.memory.lock().await.update_page(page, bytes)?;
        }
        debug!("Memory map loaded ({} pages)", RAM_PAGE_COUNT);
        Ok(())
    }

    /// Re-issue RAM reads for all pages. Explicitly a no-op while the
    /// communicator is offline; refreshing mid-handshake would collide
    /// with logon traffic.
    pub async fn refresh(&self, comm: &Communicator) -> Result<()> {
        if !comm.is_online() {
            debug!("Skipping memory refresh: communicator offline");
            return Ok(());
        }
        self.load_all(comm).await
    }

    /// Drop all cached state, e.g. before a fresh login.
    pub async fn reset(&self) {
        self.memory.lock().await.clear();
        self.zone_labels.lock().await.clear();
        self.partition_labels.lock().await.clear();
    }

    async fn read_ram_page(&self, comm: &Communicator, page: usize) -> Result<Vec<u8>> {
        let address = (page * RAM_PAGE_SIZE) as u16;
        let packet = protocol::memory_read_packet(true, address, RAM_PAGE_SIZE as u8);
        let frame = comm.encode(SERIAL_MEMORY_READ, MSG_SERIAL_REQUEST, &packet).await;
        let response = comm.roundtrip(RequestType::RamRead, frame).await?;

        let payload = response.payload().ok_or_else(|| ParadoxError::GarbledReceive {
            details: format!("RAM page {} response did not match", page),
        })?;
        extract_read_data(payload, RAM_PAGE_SIZE)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| ParadoxError::GarbledReceive {
                details: format!("RAM page {} response truncated", page),
            })
    }

    /// Read an EEPROM window. Not cached: callers that want caching (label
    /// lookups) layer it on top.
    pub async fn read_eeprom(
        &self,
        comm: &Communicator,
        address: u16,
        len: usize,
    ) -> Result<Vec<u8>> {
        let packet = protocol::memory_read_packet(false, address, len as u8);
        let frame = comm.encode(SERIAL_MEMORY_READ, MSG_SERIAL_REQUEST, &packet).await;
        let response = comm.roundtrip(RequestType::EepromRead, frame).await?;

        let payload = response.payload().ok_or_else(|| ParadoxError::GarbledReceive {
            details: format!("EEPROM response for {:#06X} did not match", address),
        })?;
        extract_read_data(payload, len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| ParadoxError::GarbledReceive {
                details: format!("EEPROM response for {:#06X} truncated", address),
            })
    }

    /// Zone label from EEPROM, cached after the first read.
    pub async fn zone_label(&self, comm: &Communicator, zone_id: u16) -> Result<String> {
        if let Some(label) = self.zone_labels.lock().await.get(&zone_id) {
            return Ok(label.clone());
        }
        let address = ZONE_LABEL_BASE + (zone_id - 1) * ZONE_LABEL_STRIDE;
        let record = self.read_eeprom(comm, address, LABEL_LEN).await?;
        let label = decode_label(&record);
        self.zone_labels.lock().await.insert(zone_id, label.clone());
        Ok(label)
    }

    /// Partition label from EEPROM, cached after the first read.
    pub async fn partition_label(&self, comm: &Communicator, partition_id: u8) -> Result<String> {
        if let Some(label) = self.partition_labels.lock().await.get(&partition_id) {
            return Ok(label.clone());
        }
        let address = PARTITION_LABEL_BASE + (partition_id as u16 - 1) * PARTITION_LABEL_STRIDE;
        let record = self.read_eeprom(comm, address, LABEL_LEN).await?;
        let label = decode_label(&record);
        self.partition_labels
            .lock()
            .await
            .insert(partition_id, label.clone());
        Ok(label)
    }

    /// Decode every zone's status from the cached snapshot. `None` until
    /// all three bitmaps are fully cached.
    pub async fn zone_statuses(&self) -> Option<Vec<ZoneStatusFlags>> {
        let memory = self.memory.lock().await;
        let open = memory.read_window(
            ZONE_OPEN_PAGE,
            ZONE_OPEN_START,
            ZONE_OPEN_START + ZONE_BITMAP_LEN - 1,
        )?;
        let tamper = memory.read_window(
            ZONE_TAMPER_PAGE,
            ZONE_TAMPER_START,
            ZONE_TAMPER_START + ZONE_BITMAP_LEN - 1,
        )?;
        let low_battery = memory.read_window(
            ZONE_LOW_BATTERY_PAGE,
            ZONE_LOW_BATTERY_START,
            ZONE_LOW_BATTERY_START + ZONE_BITMAP_LEN - 1,
        )?;
        Some(zone::decode_zone_statuses(
            &open,
            &tamper,
            &low_battery,
            self.zone_count,
        ))
    }

    /// Decode every partition's status from the cached snapshot. `None`
    /// until the flag-tuple block is fully cached.
    pub async fn partition_statuses(&self) -> Option<Vec<PartitionStatusFlags>> {
        let memory = self.memory.lock().await;
        let block = memory.read_window(
            PARTITION_FLAGS_PAGE,
            PARTITION_FLAGS_START,
            PARTITION_FLAGS_START + PARTITION_COUNT * PARTITION_FLAGS_LEN - 1,
        )?;
        Some(partition::decode_partition_statuses(&block, PARTITION_COUNT))
    }

    /// Direct access to the page cache, for tests and diagnostics.
    pub async fn with_memory<R>(&self, f: impl FnOnce(&mut MemoryMap) -> R) -> R {
        let mut memory = self.memory.lock().await;
        f(&mut memory)
    }
}

/// Pull the data bytes out of a memory-read response payload:
/// command, status, control, bus address, two address bytes, data,
/// trailing checksum.
fn extract_read_data(payload: &[u8], len: usize) -> Option<&[u8]> {
    const DATA_OFFSET: usize = 6;
    if payload.len() < DATA_OFFSET + len + 1 {
        warn!(
            "Memory read response too short: {} bytes for {} data",
            payload.len(),
            len
        );
        return None;
    }
    Some(&payload[DATA_OFFSET..DATA_OFFSET + len])
}
