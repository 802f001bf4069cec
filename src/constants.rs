// MIT License - Copyright (c) 2026 Peter Wright

/// Frame start-of-header marker.
pub const SOF: u8 = 0xAA;

/// Fixed size of the IP-module header prepended to every frame.
pub const HEADER_SIZE: usize = 16;

/// Shortest frame that can carry a classifiable serial command byte
/// (header + one payload byte).
pub const MIN_FRAME_SIZE: usize = 17;

/// Receive buffer capacity. The module never emits frames larger than this.
pub const RECEIVE_BUFFER_SIZE: usize = 256;

/// Padding byte the module appends after some frames.
pub const PADDING: u8 = 0xEE;

/// Maximum number of trailing padding bytes absorbed into a frame.
pub const MAX_TRAILING_PADDING: usize = 2;

/// Header flags byte: payload is encrypted.
pub const FLAG_ENCRYPTED: u8 = 0x08;

/// Checksum bytes are transmitted as zero. The module has never been
/// observed to reject a frame over them, and the vendor algorithm is
/// undocumented.
pub const CHECKSUM_PLACEHOLDER: u8 = 0x00;

/// Header message types.
pub const MSG_IP_CONTROL: u8 = 0x03;
pub const MSG_SERIAL_REQUEST: u8 = 0x00;
pub const MSG_SERIAL_RESPONSE: u8 = 0x01;

/// IP-layer command codes used during the logon sequence.
pub const IP_CONNECT: u8 = 0xF0;
pub const IP_LOGIN_1: u8 = 0xF2;
pub const IP_LOGIN_2: u8 = 0xF3;
pub const IP_SERIAL_CONNECTION: u8 = 0xF8;

/// Serial command bytes (payload byte 0).
pub const SERIAL_START_COMMUNICATION: u8 = 0x5F;
pub const SERIAL_INITIALIZE: u8 = 0x00;
pub const SERIAL_MEMORY_READ: u8 = 0x50;
pub const SERIAL_PARTITION_COMMAND: u8 = 0x40;
pub const SERIAL_ZONE_COMMAND: u8 = 0xD0;

/// Memory-read control byte: set for RAM, clear for EEPROM. This is the
/// secondary byte that separates the two read kinds, both of which answer
/// with a 0x5-nibble command.
pub const MEMORY_CONTROL_RAM: u8 = 0x80;

/// Result byte of the connect (logon start) response payload.
pub const LOGON_GRANTED: u8 = 0x00;
pub const LOGON_INVALID_PASSWORD: u8 = 0x01;
pub const LOGON_BUSY: u8 = 0x02;
pub const LOGON_ALREADY_CONNECTED: u8 = 0x04;

/// Length of the start-communication probe and its response payload.
pub const PROBE_LEN: usize = 37;

/// Length of the derived initialize-communication packet.
pub const INITIALIZE_LEN: usize = 29;

/// Fixed payload for the "serial connection initiated" IP command.
pub const SERIAL_CONNECTION_PAYLOAD: [u8; 6] = [0x0A, 0x50, 0x08, 0x00, 0x00, 0x01];

/// Socket-level send/receive timeout.
pub const SOCKET_TIMEOUT_MS: u64 = 4000;

/// Age at which an in-flight request awaiting its response is abandoned.
pub const RESPONSE_EXPIRY_MS: u64 = 2000;

/// Delay before draining the unsolicited packet the panel emits after the
/// final handshake step.
pub const GHOST_PACKET_DELAY_MS: u64 = 300;

/// Bounded retries on an inconsistent receive, and the backoff between them.
pub const RECEIVE_RETRY_LIMIT: u32 = 3;
pub const RECEIVE_RETRY_BACKOFF_MS: u64 = 50;

/// Send-queue capacity. The receive queue is bounded far tighter because the
/// one-in-flight invariant keeps it at a single entry.
pub const SEND_QUEUE_CAPACITY: usize = 1000;
pub const RECEIVE_QUEUE_CAPACITY: usize = 10;

// ---------------------------------------------------------------------------
// RAM layout
// ---------------------------------------------------------------------------

/// RAM is cached as fixed-size pages, replaced whole on refresh.
pub const RAM_PAGE_SIZE: usize = 64;
pub const RAM_PAGE_COUNT: usize = 16;

/// Zone status bitmaps: 24 bytes each, 1 bit per zone, LSB first.
/// Offsets are relative to the named page; a run may spill into the next page.
pub const ZONE_BITMAP_LEN: usize = 24;
pub const ZONE_OPEN_PAGE: usize = 0;
pub const ZONE_OPEN_START: usize = 0x1C;
pub const ZONE_TAMPER_PAGE: usize = 0;
pub const ZONE_TAMPER_START: usize = 0x34;
pub const ZONE_LOW_BATTERY_PAGE: usize = 1;
pub const ZONE_LOW_BATTERY_START: usize = 0x0C;

/// Partition flag tuples: 6 bytes per partition, 8 partitions.
pub const PARTITION_FLAGS_PAGE: usize = 1;
pub const PARTITION_FLAGS_START: usize = 0x24;
pub const PARTITION_FLAGS_LEN: usize = 6;
pub const PARTITION_COUNT: usize = 8;

// ---------------------------------------------------------------------------
// EEPROM layout
// ---------------------------------------------------------------------------

/// Label records are fixed-width; address = base + (index - 1) * stride.
pub const ZONE_LABEL_BASE: u16 = 0x0430;
pub const ZONE_LABEL_STRIDE: u16 = 0x10;
pub const PARTITION_LABEL_BASE: u16 = 0x3A6B;
pub const PARTITION_LABEL_STRIDE: u16 = 0x6B;
pub const LABEL_LEN: usize = 16;

/// Escape codes the panel uses for accented characters in label records.
/// Everything printable-ASCII passes through; unknown codes render as '?'.
pub const LABEL_EXTENDED_CHARS: [(u8, char); 16] = [
    (0x80, 'é'),
    (0x81, 'è'),
    (0x82, 'ê'),
    (0x83, 'ë'),
    (0x84, 'à'),
    (0x85, 'â'),
    (0x86, 'ç'),
    (0x87, 'ù'),
    (0x88, 'û'),
    (0x89, 'ô'),
    (0x8A, 'ö'),
    (0x8B, 'î'),
    (0x8C, 'ï'),
    (0x8D, 'ü'),
    (0x8E, 'ñ'),
    (0x8F, '°'),
];

/// Decode one fixed-width label record: ASCII plus the extended escape
/// codes above, with trailing space/0x00/0xFF padding trimmed.
pub fn decode_label(record: &[u8]) -> String {
    let trimmed_len = record
        .iter()
        .rposition(|&b| b != b' ' && b != 0x00 && b != 0xFF)
        .map_or(0, |p| p + 1);

    record[..trimmed_len]
        .iter()
        .map(|&b| {
            if (0x20..0x7F).contains(&b) {
                b as char
            } else {
                LABEL_EXTENDED_CHARS
                    .iter()
                    .find(|(code, _)| *code == b)
                    .map_or('?', |(_, c)| *c)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_label_plain_ascii() {
        let record = b"Front Door      ";
        assert_eq!(decode_label(record), "Front Door");
    }

    #[test]
    fn test_decode_label_accented() {
        // "Entree" with the 0x80 escape for the accented e, zero-padded
        let record = [
            b'E', b'n', b't', b'r', 0x80, b'e', 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ];
        assert_eq!(decode_label(&record), "Entrée");
    }

    #[test]
    fn test_decode_label_unknown_code() {
        let record = [b'A', 0xC7, b'B', b' ', b' ', b' ', b' ', b' '];
        assert_eq!(decode_label(&record), "A?B");
    }

    #[test]
    fn test_decode_label_ff_padding() {
        let record = [b'G', b'a', b'r', b'a', b'g', b'e', 0xFF, 0xFF];
        assert_eq!(decode_label(&record), "Garage");
    }

    #[test]
    fn test_decode_label_all_padding() {
        assert_eq!(decode_label(&[0x00; 16]), "");
        assert_eq!(decode_label(&[b' '; 16]), "");
    }

    #[test]
    fn test_decode_label_interior_space_kept() {
        let record = b"Back  Door\x00\x00\x00\x00\x00\x00";
        assert_eq!(decode_label(record), "Back  Door");
    }
}
