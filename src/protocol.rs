// MIT License - Copyright (c) 2026 Peter Wright

//! Frame construction and parsing for the IP module wire protocol.
//!
//! Every frame is a fixed 16-byte header followed by a serial payload. The
//! header carries the start marker, the declared frame length (header plus
//! payload), a message type, flags, the IP-layer command pair, the module
//! address, and a trailing checksum byte that the vendor tooling always
//! writes as zero.
//!
//! The first payload byte is the serial command byte; its high nibble
//! classifies which request a response belongs to. A frame that does not
//! match the outstanding request's nibble set decodes to `None` - that is
//! the ordinary "not my packet" signal, not a protocol error.

use crate::constants::*;
use crate::crypto::EncryptionHandler;

/// The kinds of request that travel over one panel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Logon sequence traffic (IP control and handshake serial packets)
    Logon,
    /// Paged RAM read
    RamRead,
    /// Windowed EEPROM read
    EepromRead,
    /// Partition arm/disarm
    PartitionCommand,
    /// Zone bypass control
    ZoneCommand,
}

impl RequestType {
    /// Whether a serial command byte's high nibble belongs to this request
    /// type's expected response set.
    pub fn matches_command(&self, command: u8) -> bool {
        let nibble = command >> 4;
        match self {
            Self::Logon => matches!(nibble, 0x0 | 0x1 | 0x7),
            Self::RamRead | Self::EepromRead => nibble == 0x5,
            Self::PartitionCommand => nibble == 0x4,
            Self::ZoneCommand => nibble == 0xD,
        }
    }
}

/// A parsed inbound frame, borrowed from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    pub header: &'a [u8],
    pub payload: &'a [u8],
}

/// Build an outbound frame: 16-byte header plus the (optionally encrypted)
/// payload. Encryption zero-pads the payload to the cipher block boundary,
/// and the declared length covers the padded payload.
pub fn encode(
    command: u8,
    message_type: u8,
    payload: &[u8],
    crypto: Option<&EncryptionHandler>,
) -> Vec<u8> {
    let body = match crypto {
        Some(handler) => handler.encrypt(payload),
        None => payload.to_vec(),
    };

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.push(SOF);
    frame.push((HEADER_SIZE + body.len()) as u8);
    frame.push(message_type);
    frame.push(if crypto.is_some() { FLAG_ENCRYPTED } else { 0x00 });
    frame.push(command);
    frame.push(0x00); // sub-command
    frame.push(0x00); // module address, filled by the module on responses
    frame.extend_from_slice(&[0u8; 8]);
    frame.push(CHECKSUM_PLACEHOLDER);
    debug_assert_eq!(frame.len(), HEADER_SIZE);
    frame.extend_from_slice(&body);
    frame
}

/// Whether a received frame's header marks its payload as encrypted.
pub fn is_encrypted(raw: &[u8]) -> bool {
    raw.len() > 3 && raw[3] & FLAG_ENCRYPTED != 0
}

/// Slice a plaintext inbound frame into header and payload for the given
/// outstanding request.
///
/// Returns `None` when the frame is too short to carry a command byte, when
/// its declared length disagrees with the bytes actually present, or when
/// the command nibble does not belong to the request type's expected set.
/// Memory-read responses are additionally split on the control byte: the
/// RAM flag must agree with whether a RAM or an EEPROM read is outstanding.
pub fn decode(raw: &[u8], request_type: RequestType) -> Option<DecodedFrame<'_>> {
    if raw.len() < MIN_FRAME_SIZE {
        return None;
    }

    let declared = raw[1] as usize;
    if declared < MIN_FRAME_SIZE || declared > raw.len() {
        return None;
    }

    let command = raw[HEADER_SIZE];
    if !request_type.matches_command(command) {
        return None;
    }

    let payload = &raw[HEADER_SIZE..declared];

    if matches!(request_type, RequestType::RamRead | RequestType::EepromRead) {
        // Control byte separates the two read kinds behind the shared nibble
        let control = *payload.get(2)?;
        let is_ram = control & MEMORY_CONTROL_RAM != 0;
        if is_ram != matches!(request_type, RequestType::RamRead) {
            return None;
        }
    }

    Some(DecodedFrame {
        header: &raw[..HEADER_SIZE],
        payload,
    })
}

/// Split a receive buffer into candidate frames.
///
/// A single socket read can contain several logical frames back to back -
/// live panel events interleave with the expected reply. The walk follows
/// each frame's declared length byte and absorbs up to
/// [`MAX_TRAILING_PADDING`] padding bytes into the frame that precedes
/// them. The walk stops at the first position that cannot be a frame start;
/// the caller treats the remainder as garbage and retries reading.
pub fn split_frames(buffer: &[u8]) -> Vec<&[u8]> {
    let mut frames = Vec::new();
    let mut pos = 0;

    while buffer.len() - pos >= 2 {
        if buffer[pos] != SOF {
            break;
        }
        let declared = buffer[pos + 1] as usize;
        if declared < HEADER_SIZE || pos + declared > buffer.len() {
            break;
        }

        let mut end = pos + declared;
        let mut absorbed = 0;
        while absorbed < MAX_TRAILING_PADDING && end < buffer.len() && buffer[end] == PADDING {
            end += 1;
            absorbed += 1;
        }

        frames.push(&buffer[pos..end]);
        pos = end;
    }

    frames
}

// ---------------------------------------------------------------------------
// Serial packet builders
// ---------------------------------------------------------------------------

/// The 37-byte start-communication probe sent in Step4 and Step6. The panel
/// answers with a 37-byte identity message.
pub fn probe_packet() -> [u8; PROBE_LEN] {
    let mut packet = [0u8; PROBE_LEN];
    packet[0] = SERIAL_START_COMMUNICATION;
    packet[1] = 0x20;
    packet[PROBE_LEN - 1] = CHECKSUM_PLACEHOLDER;
    packet
}

/// Build the 29-byte initialize-communication packet from the raw
/// start-communication response payload, splicing in the PC password.
///
/// This is a pure byte rearrangement: identity fields are copied from their
/// response offsets, reserved fields stay zero, and the trailing checksum is
/// written as zero like every other checksum on this protocol.
///
/// Returns `None` when the source message is shorter than the highest
/// offset read from it.
pub fn initialize_packet(init_message: &[u8], pc_password: [u8; 2]) -> Option<[u8; INITIALIZE_LEN]> {
    if init_message.len() < PROBE_LEN {
        return None;
    }

    let mut packet = [0u8; INITIALIZE_LEN];
    packet[0] = SERIAL_INITIALIZE;
    packet[1] = init_message[1]; // module address
    packet[4] = init_message[4]; // product id
    packet[5] = init_message[5]; // software version
    packet[6] = init_message[6]; // software revision
    packet[7] = init_message[7]; // software id
    packet[8] = init_message[8]; // module id
    packet[9] = init_message[9];
    packet[10] = pc_password[0];
    packet[11] = pc_password[1];
    packet[12..16].copy_from_slice(&init_message[12..16]); // serial number
    packet[16..25].copy_from_slice(&init_message[17..26]); // vendor section
    packet[INITIALIZE_LEN - 1] = CHECKSUM_PLACEHOLDER;
    Some(packet)
}

/// Build a RAM or EEPROM read request for `count` bytes at `address`.
pub fn memory_read_packet(ram: bool, address: u16, count: u8) -> [u8; 8] {
    let control = if ram { MEMORY_CONTROL_RAM } else { 0x00 };
    [
        SERIAL_MEMORY_READ,
        0x08,
        control,
        0x00,
        (address >> 8) as u8,
        (address & 0xFF) as u8,
        count,
        CHECKSUM_PLACEHOLDER,
    ]
}

/// Arm mode for partition commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmMode {
    Regular,
    Force,
    Stay,
    Instant,
}

/// Actions routed as partition command requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionAction {
    Arm(ArmMode),
    Disarm,
}

impl PartitionAction {
    fn code(&self) -> u8 {
        match self {
            Self::Arm(ArmMode::Regular) => 0x02,
            Self::Arm(ArmMode::Stay) => 0x03,
            Self::Arm(ArmMode::Instant) => 0x04,
            Self::Arm(ArmMode::Force) => 0x05,
            Self::Disarm => 0x06,
        }
    }
}

/// Actions routed as zone command requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneAction {
    Bypass,
    ClearBypass,
}

impl ZoneAction {
    fn code(&self) -> u8 {
        match self {
            Self::Bypass => 0x10,
            Self::ClearBypass => 0x11,
        }
    }
}

/// Build a partition command packet. Partition ids are 1-based.
pub fn partition_command_packet(partition: u8, action: PartitionAction) -> [u8; 5] {
    [
        SERIAL_PARTITION_COMMAND,
        partition,
        action.code(),
        0x00,
        CHECKSUM_PLACEHOLDER,
    ]
}

/// Build a zone command packet. Zone ids are 1-based.
pub fn zone_command_packet(zone: u16, action: ZoneAction) -> [u8; 6] {
    [
        SERIAL_ZONE_COMMAND,
        (zone >> 8) as u8,
        (zone & 0xFF) as u8,
        action.code(),
        0x00,
        CHECKSUM_PLACEHOLDER,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a plaintext response frame with the given serial payload.
    fn response_frame(payload: &[u8]) -> Vec<u8> {
        encode(0x00, MSG_SERIAL_RESPONSE, payload, None)
    }

    #[test]
    fn test_encode_header_shape() {
        let frame = encode(IP_CONNECT, MSG_IP_CONTROL, b"5678", None);
        assert_eq!(frame[0], SOF);
        assert_eq!(frame[1] as usize, HEADER_SIZE + 4);
        assert_eq!(frame[2], MSG_IP_CONTROL);
        assert_eq!(frame[3], 0x00);
        assert_eq!(frame[4], IP_CONNECT);
        assert_eq!(frame[15], CHECKSUM_PLACEHOLDER);
        assert_eq!(&frame[HEADER_SIZE..], b"5678");
    }

    #[test]
    fn test_encode_encrypted_pads_and_flags() {
        let handler = EncryptionHandler::new("1234");
        let frame = encode(IP_CONNECT, MSG_IP_CONTROL, b"5678", Some(&handler));
        assert_eq!(frame[3], FLAG_ENCRYPTED);
        // Payload padded to one cipher block
        assert_eq!(frame[1] as usize, HEADER_SIZE + 16);
        assert!(is_encrypted(&frame));

        let decrypted = handler.decrypt(&frame[HEADER_SIZE..]);
        assert_eq!(&decrypted[..4], b"5678");
    }

    #[test]
    fn test_decode_roundtrip_plaintext() {
        let payload = [0x42, 0x01, 0x00, 0x00, 0x00];
        let frame = response_frame(&payload);
        let decoded = decode(&frame, RequestType::PartitionCommand)
            .expect("partition response should decode");
        assert_eq!(decoded.header, &frame[..HEADER_SIZE]);
        assert_eq!(decoded.payload, &payload);
    }

    #[test]
    fn test_decode_too_short() {
        assert!(decode(&[0xAA; 16], RequestType::Logon).is_none());
        assert!(decode(&[], RequestType::Logon).is_none());
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut frame = response_frame(&[0x42, 0x01]);
        frame[1] = 0xF0; // declared length exceeds actual bytes
        assert!(decode(&frame, RequestType::PartitionCommand).is_none());
    }

    #[test]
    fn test_decode_nibble_table_exhaustive() {
        // Every nibble value against every request type; only the expected
        // sets may produce a decoded frame.
        let types = [
            RequestType::Logon,
            RequestType::RamRead,
            RequestType::EepromRead,
            RequestType::PartitionCommand,
            RequestType::ZoneCommand,
        ];
        for nibble in 0x0u8..=0xF {
            let command = nibble << 4 | 0x02;
            // Control byte with the RAM flag set so RamRead can match
            let payload = [command, 0x00, MEMORY_CONTROL_RAM, 0x00, 0x00];
            let frame = response_frame(&payload);
            for request_type in types {
                let expected = match request_type {
                    RequestType::Logon => matches!(nibble, 0x0 | 0x1 | 0x7),
                    RequestType::RamRead => nibble == 0x5,
                    RequestType::EepromRead => false, // RAM flag set
                    RequestType::PartitionCommand => nibble == 0x4,
                    RequestType::ZoneCommand => nibble == 0xD,
                };
                assert_eq!(
                    decode(&frame, request_type).is_some(),
                    expected,
                    "nibble {:#X} vs {:?}",
                    nibble,
                    request_type
                );
            }
        }
    }

    #[test]
    fn test_decode_memory_control_byte() {
        let ram_payload = [0x52, 0x00, MEMORY_CONTROL_RAM, 0x00, 0x00, 0x40];
        let eeprom_payload = [0x52, 0x00, 0x00, 0x00, 0x04, 0x30];

        let ram_frame = response_frame(&ram_payload);
        let eeprom_frame = response_frame(&eeprom_payload);

        assert!(decode(&ram_frame, RequestType::RamRead).is_some());
        assert!(decode(&ram_frame, RequestType::EepromRead).is_none());
        assert!(decode(&eeprom_frame, RequestType::EepromRead).is_some());
        assert!(decode(&eeprom_frame, RequestType::RamRead).is_none());
    }

    #[test]
    fn test_split_single_frame_with_padding() {
        // Declared length 16, two trailing padding bytes: one 18-byte
        // message, not split.
        let mut buffer = vec![0u8; 18];
        buffer[0] = SOF;
        buffer[1] = 0x10;
        buffer[16] = PADDING;
        buffer[17] = PADDING;

        let frames = split_frames(&buffer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 18);
    }

    #[test]
    fn test_split_two_concatenated_frames() {
        let mut buffer = vec![0u8; 32];
        buffer[0] = SOF;
        buffer[1] = 0x10;
        buffer[16] = SOF;
        buffer[17] = 0x10;

        let frames = split_frames(&buffer);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 16);
        assert_eq!(frames[1].len(), 16);
    }

    #[test]
    fn test_split_event_before_reply() {
        // A live event frame followed by the expected reply; the receiver
        // picks by nibble, the splitter just yields both.
        let event = response_frame(&[0xE2, 0x05]);
        let reply = response_frame(&[0x42, 0x00]);
        let mut buffer = event.clone();
        buffer.extend_from_slice(&reply);

        let frames = split_frames(&buffer);
        assert_eq!(frames.len(), 2);
        assert!(decode(frames[0], RequestType::PartitionCommand).is_none());
        assert!(decode(frames[1], RequestType::PartitionCommand).is_some());
    }

    #[test]
    fn test_split_stops_on_garbage() {
        let mut buffer = response_frame(&[0x12, 0x00]);
        let good = buffer.len();
        buffer.extend_from_slice(&[0x55, 0x55, 0x55]);

        let frames = split_frames(&buffer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), good);
    }

    #[test]
    fn test_split_empty_and_runt() {
        assert!(split_frames(&[]).is_empty());
        assert!(split_frames(&[SOF]).is_empty());
        // Declared length shorter than a header is not a frame
        assert!(split_frames(&[SOF, 0x04, 0x00, 0x00]).is_empty());
    }

    #[test]
    fn test_probe_packet_shape() {
        let probe = probe_packet();
        assert_eq!(probe.len(), PROBE_LEN);
        assert_eq!(probe[0], SERIAL_START_COMMUNICATION);
        assert_eq!(probe[1], 0x20);
        assert!(probe[2..PROBE_LEN - 1].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_initialize_packet_field_mapping() {
        let mut source = vec![0u8; PROBE_LEN];
        source[0] = 0x72;
        source[1] = 0x08; // module address
        source[4] = 0x05; // product id
        source[5] = 0x71; // software version
        source[6] = 0x02; // software revision
        source[7] = 0x30; // software id
        source[8] = 0xAB; // module id
        source[9] = 0xCD;
        source[12..16].copy_from_slice(&[0x12, 0x34, 0x56, 0x78]); // serial
        for (i, byte) in source[17..26].iter_mut().enumerate() {
            *byte = 0x90 + i as u8; // vendor section
        }

        let packet = initialize_packet(&source, [0x12, 0x34]).expect("long enough");
        assert_eq!(packet.len(), INITIALIZE_LEN);
        assert_eq!(packet[0], SERIAL_INITIALIZE);
        assert_eq!(packet[1], 0x08);
        assert_eq!(&packet[2..4], &[0, 0]);
        assert_eq!(packet[4], 0x05);
        assert_eq!(packet[5], 0x71);
        assert_eq!(packet[6], 0x02);
        assert_eq!(packet[7], 0x30);
        assert_eq!(packet[8], 0xAB);
        assert_eq!(packet[9], 0xCD);
        assert_eq!(&packet[10..12], &[0x12, 0x34]);
        assert_eq!(&packet[12..16], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(
            &packet[16..25],
            &[0x90, 0x91, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98]
        );
        assert!(packet[25..28].iter().all(|&b| b == 0));
        assert_eq!(packet[28], CHECKSUM_PLACEHOLDER);
    }

    #[test]
    fn test_initialize_packet_rejects_short_source() {
        assert!(initialize_packet(&[0u8; 20], [0, 0]).is_none());
    }

    #[test]
    fn test_memory_read_packet() {
        let ram = memory_read_packet(true, 0x0040, 64);
        assert_eq!(ram[0], SERIAL_MEMORY_READ);
        assert_eq!(ram[2], MEMORY_CONTROL_RAM);
        assert_eq!(ram[4], 0x00);
        assert_eq!(ram[5], 0x40);
        assert_eq!(ram[6], 64);

        let eeprom = memory_read_packet(false, 0x3A6B, 16);
        assert_eq!(eeprom[2], 0x00);
        assert_eq!(eeprom[4], 0x3A);
        assert_eq!(eeprom[5], 0x6B);
        assert_eq!(eeprom[6], 16);
    }

    #[test]
    fn test_command_packets() {
        let arm = partition_command_packet(3, PartitionAction::Arm(ArmMode::Stay));
        assert_eq!(arm, [SERIAL_PARTITION_COMMAND, 3, 0x03, 0x00, 0x00]);

        let disarm = partition_command_packet(1, PartitionAction::Disarm);
        assert_eq!(disarm[2], 0x06);

        let bypass = zone_command_packet(150, ZoneAction::Bypass);
        assert_eq!(bypass[0], SERIAL_ZONE_COMMAND);
        assert_eq!(((bypass[1] as u16) << 8) | bypass[2] as u16, 150);
        assert_eq!(bypass[3], 0x10);
    }
}
