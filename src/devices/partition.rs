// MIT License - Copyright (c) 2026 Peter Wright

use bitflags::bitflags;

use crate::constants::PARTITION_FLAGS_LEN;

bitflags! {
    /// Partition status decoded from its 6-byte RAM flag tuple.
    ///
    /// Byte 0 carries arm state, byte 1 alarm state, byte 2 readiness and
    /// trouble; bytes 3-5 are reserved by the panel. The flag word packs
    /// tuple byte N into bits `8*N..8*N+8`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartitionStatusFlags: u32 {
        // byte 0 - arm state
        const ARMED           = 0x0000_0001;
        const ARMED_STAY      = 0x0000_0002;
        const ARMED_INSTANT   = 0x0000_0004;
        const ARMED_FORCE     = 0x0000_0008;
        // byte 1 - alarm state
        const ALARM           = 0x0000_0100;
        const AUDIBLE_ALARM   = 0x0000_0200;
        const SILENT_ALARM    = 0x0000_0400;
        const STROBE          = 0x0000_0800;
        const FIRE_ALARM      = 0x0000_1000;
        // byte 2 - readiness and trouble
        const READY           = 0x0001_0000;
        const EXIT_DELAY      = 0x0002_0000;
        const ENTRY_DELAY     = 0x0004_0000;
        const TROUBLE         = 0x0008_0000;
        const ALARM_IN_MEMORY = 0x0010_0000;
        const ZONE_BYPASSED   = 0x0020_0000;
    }
}

impl PartitionStatusFlags {
    /// Decode one partition's 6-byte flag tuple. Returns `None` on a short
    /// slice; reserved bits are dropped.
    pub fn from_tuple(tuple: &[u8]) -> Option<Self> {
        if tuple.len() < PARTITION_FLAGS_LEN {
            return None;
        }
        let word =
            (tuple[0] as u32) | ((tuple[1] as u32) << 8) | ((tuple[2] as u32) << 16);
        Some(Self::from_bits_truncate(word))
    }

    /// The flags that changed between two snapshots.
    pub fn changed(old: Self, new: Self) -> Self {
        old ^ new
    }
}

/// Decode every partition's status from the contiguous flag-tuple block.
/// Pure function of the snapshot bytes.
pub fn decode_partition_statuses(block: &[u8], count: usize) -> Vec<PartitionStatusFlags> {
    block
        .chunks(PARTITION_FLAGS_LEN)
        .take(count)
        .filter_map(PartitionStatusFlags::from_tuple)
        .collect()
}

/// A single alarm partition.
#[derive(Debug, Clone)]
pub struct Partition {
    pub id: u8,
    pub label: String,
    pub status: PartitionStatusFlags,
    first_status: bool,
}

impl Partition {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            label: String::new(),
            status: PartitionStatusFlags::empty(),
            first_status: true,
        }
    }

    /// Apply a fresh status snapshot. Returns the changed flags; the very
    /// first snapshot establishes a baseline and reports no change.
    pub fn update_status(&mut self, new_status: PartitionStatusFlags) -> PartitionStatusFlags {
        let changed = PartitionStatusFlags::changed(self.status, new_status);
        self.status = new_status;
        if self.first_status {
            self.first_status = false;
            return PartitionStatusFlags::empty();
        }
        changed
    }

    pub fn is_armed(&self) -> bool {
        self.status.intersects(
            PartitionStatusFlags::ARMED
                | PartitionStatusFlags::ARMED_STAY
                | PartitionStatusFlags::ARMED_INSTANT
                | PartitionStatusFlags::ARMED_FORCE,
        )
    }

    pub fn is_alarm(&self) -> bool {
        self.status.intersects(
            PartitionStatusFlags::ALARM
                | PartitionStatusFlags::AUDIBLE_ALARM
                | PartitionStatusFlags::SILENT_ALARM
                | PartitionStatusFlags::FIRE_ALARM,
        )
    }

    pub fn is_ready(&self) -> bool {
        self.status.contains(PartitionStatusFlags::READY)
    }

    pub fn is_trouble(&self) -> bool {
        self.status.contains(PartitionStatusFlags::TROUBLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tuple_golden() {
        // Armed + audible alarm + ready
        let tuple = [0x01, 0x03, 0x01, 0x00, 0x00, 0x00];
        let flags = PartitionStatusFlags::from_tuple(&tuple).unwrap();
        assert!(flags.contains(PartitionStatusFlags::ARMED));
        assert!(flags.contains(PartitionStatusFlags::ALARM));
        assert!(flags.contains(PartitionStatusFlags::AUDIBLE_ALARM));
        assert!(flags.contains(PartitionStatusFlags::READY));
        assert!(!flags.contains(PartitionStatusFlags::ARMED_STAY));
    }

    #[test]
    fn test_from_tuple_short() {
        assert!(PartitionStatusFlags::from_tuple(&[0x01, 0x00]).is_none());
    }

    #[test]
    fn test_reserved_bits_dropped() {
        let tuple = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let flags = PartitionStatusFlags::from_tuple(&tuple).unwrap();
        // Only defined bits survive
        assert_eq!(flags, PartitionStatusFlags::all());
    }

    #[test]
    fn test_decode_partition_statuses() {
        let mut block = vec![0u8; 48];
        block[0] = 0x01; // partition 1 armed
        block[6 * 2 + 2] = 0x01; // partition 3 ready

        let statuses = decode_partition_statuses(&block, 8);
        assert_eq!(statuses.len(), 8);
        assert!(statuses[0].contains(PartitionStatusFlags::ARMED));
        assert!(statuses[2].contains(PartitionStatusFlags::READY));
        assert!(statuses[1].is_empty());

        let again = decode_partition_statuses(&block, 8);
        assert_eq!(statuses, again);
    }

    #[test]
    fn test_partition_update_status() {
        let mut part = Partition::new(1);
        let armed = PartitionStatusFlags::ARMED | PartitionStatusFlags::READY;

        // First snapshot: baseline, no change reported
        assert!(part.update_status(armed).is_empty());
        assert!(part.is_armed());

        let changed = part.update_status(PartitionStatusFlags::READY);
        assert_eq!(changed, PartitionStatusFlags::ARMED);
        assert!(!part.is_armed());
        assert!(part.is_ready());
    }
}
