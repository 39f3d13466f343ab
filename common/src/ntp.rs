use crate::error::NetError;

pub const NTP_PORT: u16 = 123;
pub const NTP_PACKET_LEN: usize = 48;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
pub const NTP_DELTA: i64 = 2_208_988_800;

// LI = 0, VN = 3, mode = 3 (client).
const CLIENT_REQUEST_HEADER: u8 = 0x1B;
const TRANSMIT_TIMESTAMP_OFFSET: usize = 40;
const ERA_LENGTH: i64 = 1 << 32;

pub fn client_request() -> [u8; NTP_PACKET_LEN] {
    let mut packet = [0_u8; NTP_PACKET_LEN];
    packet[0] = CLIENT_REQUEST_HEADER;
    packet
}

/// Extracts the transmit timestamp of a server response as Unix seconds.
pub fn parse_response(response: &[u8]) -> Result<i64, NetError> {
    if response.len() < NTP_PACKET_LEN {
        return Err(NetError::NtpResponse(format!(
            "expected {NTP_PACKET_LEN} bytes, got {}",
            response.len()
        )));
    }

    let raw: [u8; 4] = response[TRANSMIT_TIMESTAMP_OFFSET..TRANSMIT_TIMESTAMP_OFFSET + 4]
        .try_into()
        .map_err(|_| NetError::NtpResponse("truncated transmit timestamp".to_string()))?;
    let seconds = i64::from(u32::from_be_bytes(raw));

    if seconds == 0 {
        return Err(NetError::NtpResponse(
            "server sent an empty transmit timestamp".to_string(),
        ));
    }

    // Era 0 ends in 2036; values with the high bit clear belong to era 1.
    let seconds = if seconds & 0x8000_0000 == 0 {
        seconds + ERA_LENGTH
    } else {
        seconds
    };

    Ok(seconds - NTP_DELTA)
}
