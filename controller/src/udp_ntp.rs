use std::{io::ErrorKind, net::UdpSocket, time::Duration};

use lamp_common::{
    ntp::{NTP_PACKET_LEN, NTP_PORT},
    NetError, NtpTransport,
};

/// Raw SNTP exchange over a std UDP socket. Works on the host and on ESP-IDF,
/// whose lwIP stack backs `std::net`.
#[derive(Debug, Default)]
pub struct UdpNtp;

impl NtpTransport for UdpNtp {
    fn exchange(
        &mut self,
        host: &str,
        request: &[u8; NTP_PACKET_LEN],
        timeout: Duration,
    ) -> Result<Vec<u8>, NetError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(io_error)?;
        socket.set_read_timeout(Some(timeout)).map_err(io_error)?;
        socket.set_write_timeout(Some(timeout)).map_err(io_error)?;
        socket.connect((host, NTP_PORT)).map_err(io_error)?;
        socket.send(request).map_err(io_error)?;

        let mut buf = [0_u8; 2 * NTP_PACKET_LEN];
        let read = socket.recv(&mut buf).map_err(io_error)?;
        Ok(buf[..read].to_vec())
    }
}

fn io_error(err: std::io::Error) -> NetError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => NetError::Timeout,
        _ => NetError::Transport(err.to_string()),
    }
}
