// src/tftp.rs
//! Read-request side of TFTP (RFC 1350) with the transfer size option (RFC 2349).
//!
//! Only the first reply to a read request is inspected: an OACK or DATA packet means the
//! file exists, an ERROR packet means it does not. The transfer is then torn down.

use crate::error::Result;
use crate::types::BusterError;
use log::debug;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

pub const DEFAULT_PORT: u16 = 69;
const BLOCK_SIZE: usize = 512;

const OP_RRQ: u16 = 1;
const OP_DATA: u16 = 3;
const OP_ACK: u16 = 4;
const OP_ERROR: u16 = 5;
const OP_OACK: u16 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ReadRequest { filename: String, options: Vec<(String, String)> },
    Data { block: u16, data: Vec<u8> },
    Ack { block: u16 },
    Error { code: u16, message: String },
    OptionAck { options: Vec<(String, String)> },
}

impl Packet {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Packet::ReadRequest { filename, options } => {
                buf.extend_from_slice(&OP_RRQ.to_be_bytes());
                push_str(&mut buf, filename);
                push_str(&mut buf, "octet");
                for (name, value) in options {
                    push_str(&mut buf, name);
                    push_str(&mut buf, value);
                }
            }
            Packet::Data { block, data } => {
                buf.extend_from_slice(&OP_DATA.to_be_bytes());
                buf.extend_from_slice(&block.to_be_bytes());
                buf.extend_from_slice(data);
            }
            Packet::Ack { block } => {
                buf.extend_from_slice(&OP_ACK.to_be_bytes());
                buf.extend_from_slice(&block.to_be_bytes());
            }
            Packet::Error { code, message } => {
                buf.extend_from_slice(&OP_ERROR.to_be_bytes());
                buf.extend_from_slice(&code.to_be_bytes());
                push_str(&mut buf, message);
            }
            Packet::OptionAck { options } => {
                buf.extend_from_slice(&OP_OACK.to_be_bytes());
                for (name, value) in options {
                    push_str(&mut buf, name);
                    push_str(&mut buf, value);
                }
            }
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(malformed("packet too short"));
        }
        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        let rest = &buf[2..];

        match opcode {
            OP_RRQ => {
                let mut fields = split_strings(rest);
                if fields.len() < 2 {
                    return Err(malformed("read request without mode"));
                }
                let filename = fields.remove(0);
                fields.remove(0);
                Ok(Packet::ReadRequest {
                    filename,
                    options: pairs(fields),
                })
            }
            OP_DATA | OP_ACK | OP_ERROR if rest.len() < 2 => Err(malformed("missing block number")),
            OP_DATA => Ok(Packet::Data {
                block: u16::from_be_bytes([rest[0], rest[1]]),
                data: rest[2..].to_vec(),
            }),
            OP_ACK => Ok(Packet::Ack {
                block: u16::from_be_bytes([rest[0], rest[1]]),
            }),
            OP_ERROR => Ok(Packet::Error {
                code: u16::from_be_bytes([rest[0], rest[1]]),
                message: split_strings(&rest[2..]).into_iter().next().unwrap_or_default(),
            }),
            OP_OACK => Ok(Packet::OptionAck {
                options: pairs(split_strings(rest)),
            }),
            other => Err(malformed(&format!("unknown opcode {}", other))),
        }
    }
}

fn push_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
}

fn split_strings(buf: &[u8]) -> Vec<String> {
    buf.split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).to_string())
        .collect()
}

fn pairs(fields: Vec<String>) -> Vec<(String, String)> {
    fields
        .chunks(2)
        .filter(|c| c.len() == 2)
        .map(|c| (c[0].to_lowercase(), c[1].clone()))
        .collect()
}

fn malformed(message: &str) -> BusterError {
    BusterError::TftpError(format!("malformed packet: {}", message))
}

/// Splits `host[:port]` into a connectable address string, defaulting to port 69.
pub fn normalize_server(server: &str) -> Result<String> {
    let server = server.trim();
    if server.is_empty() {
        return Err(BusterError::ConfigError("TFTP server is required".to_string()));
    }
    if server.parse::<SocketAddr>().is_ok() {
        return Ok(server.to_string());
    }
    if let Ok(ip) = server.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT).to_string());
    }
    match server.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            port.parse::<u16>().map_err(|_| {
                BusterError::ConfigError(format!("invalid TFTP server port in {:?}", server))
            })?;
            Ok(server.to_string())
        }
        Some(_) => Err(BusterError::ConfigError(format!(
            "invalid TFTP server {:?}",
            server
        ))),
        None => Ok(format!("{}:{}", server, DEFAULT_PORT)),
    }
}

/// Client handle for one server. Constructing it performs no network I/O.
#[derive(Debug, Clone)]
pub struct TftpClient {
    address: String,
    timeout: Duration,
}

impl TftpClient {
    pub fn new(server: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            address: normalize_server(server)?,
            timeout,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Requests `filename` and returns the size the server reports, if any.
    pub async fn probe(&self, filename: &str) -> Result<Option<u64>> {
        let server = tokio::net::lookup_host(&self.address)
            .await
            .map_err(|e| BusterError::TftpError(format!("cannot resolve {}: {}", self.address, e)))?
            .next()
            .ok_or_else(|| BusterError::TftpError(format!("no address for {}", self.address)))?;

        let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| BusterError::TftpError(format!("cannot bind socket: {}", e)))?;

        let request = Packet::ReadRequest {
            filename: filename.to_string(),
            options: vec![("tsize".to_string(), "0".to_string())],
        };
        socket
            .send_to(&request.encode(), server)
            .await
            .map_err(|e| BusterError::TftpError(format!("send failed: {}", e)))?;

        let (packet, peer) = tokio::time::timeout(self.timeout, recv_from_server(&socket, server))
            .await
            .map_err(|_| {
                BusterError::Timeout(format!("no TFTP reply for {} from {}", filename, server))
            })??;

        match packet {
            Packet::OptionAck { options } => {
                abort(&socket, peer).await;
                Ok(options
                    .iter()
                    .find(|(name, _)| name == "tsize")
                    .and_then(|(_, value)| value.parse().ok()))
            }
            Packet::Data { block, data } => {
                if data.len() < BLOCK_SIZE {
                    // Single block transfer, acknowledge it so the server can finish.
                    send_best_effort(&socket, &Packet::Ack { block }, peer).await;
                    Ok(Some(data.len() as u64))
                } else {
                    abort(&socket, peer).await;
                    Ok(None)
                }
            }
            Packet::Error { code, message } => Err(BusterError::TftpError(format!(
                "server error {}: {}",
                code, message
            ))),
            other => Err(BusterError::TftpError(format!(
                "unexpected reply {:?}",
                other
            ))),
        }
    }
}

async fn recv_from_server(socket: &UdpSocket, server: SocketAddr) -> Result<(Packet, SocketAddr)> {
    let mut buf = [0u8; BLOCK_SIZE + 4];
    loop {
        let (len, peer) = socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| BusterError::TftpError(format!("receive failed: {}", e)))?;
        // Replies come from a new port on the same host.
        if peer.ip() != server.ip() {
            continue;
        }
        return Ok((Packet::decode(&buf[..len])?, peer));
    }
}

async fn abort(socket: &UdpSocket, peer: SocketAddr) {
    let packet = Packet::Error {
        code: 0,
        message: "transfer aborted".to_string(),
    };
    send_best_effort(socket, &packet, peer).await;
}

/// Sends a packet whose delivery does not change the fetch outcome.
async fn send_best_effort(socket: &UdpSocket, packet: &Packet, peer: SocketAddr) {
    if let Err(e) = socket.send_to(&packet.encode(), peer).await {
        debug!("failed to send {:?} to {}: {}", packet, peer, e);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Serves OACK for `sized.bin`, a short DATA block for `small.txt`, ERROR otherwise.
    pub(crate) async fn spawn_stub_server() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let reply = match Packet::decode(&buf[..len]) {
                    Ok(Packet::ReadRequest { filename, .. }) => match filename.as_str() {
                        "sized.bin" => Packet::OptionAck {
                            options: vec![("tsize".to_string(), "4096".to_string())],
                        },
                        "small.txt" => Packet::Data {
                            block: 1,
                            data: b"hello".to_vec(),
                        },
                        _ => Packet::Error {
                            code: 1,
                            message: "File not found".to_string(),
                        },
                    },
                    _ => continue,
                };
                let _ = socket.send_to(&reply.encode(), peer).await;
            }
        });

        addr
    }

    #[test]
    fn test_read_request_encoding() {
        let packet = Packet::ReadRequest {
            filename: "boot.cfg".to_string(),
            options: vec![("tsize".to_string(), "0".to_string())],
        };
        let encoded = packet.encode();
        assert_eq!(&encoded[..2], &[0, 1]);
        assert_eq!(&encoded[2..], b"boot.cfg\0octet\0tsize\00\0");
        assert_eq!(Packet::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_decode_error_packet() {
        let packet = Packet::decode(b"\x00\x05\x00\x01File not found\x00").unwrap();
        assert_eq!(
            packet,
            Packet::Error {
                code: 1,
                message: "File not found".to_string()
            }
        );
        assert!(Packet::decode(b"\x00").is_err());
        assert!(Packet::decode(b"\x00\x09").is_err());
    }

    #[test]
    fn test_normalize_server() {
        assert_eq!(normalize_server("10.0.0.1").unwrap(), "10.0.0.1:69");
        assert_eq!(normalize_server("10.0.0.1:6969").unwrap(), "10.0.0.1:6969");
        assert_eq!(normalize_server("tftp.local").unwrap(), "tftp.local:69");
        assert_eq!(normalize_server("[::1]").unwrap(), "[::1]:69");
        assert!(normalize_server("").is_err());
        assert!(normalize_server("host:port").is_err());
    }

    #[tokio::test]
    async fn test_probe_against_stub_server() {
        let addr = spawn_stub_server().await;
        let client = TftpClient::new(&addr.to_string(), Duration::from_secs(2)).unwrap();

        assert_eq!(client.probe("sized.bin").await.unwrap(), Some(4096));
        assert_eq!(client.probe("small.txt").await.unwrap(), Some(5));
        assert!(matches!(
            client.probe("missing.txt").await,
            Err(BusterError::TftpError(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();
        let client = TftpClient::new(&addr.to_string(), Duration::from_millis(200)).unwrap();

        let err = client.probe("anything").await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_best_effort_send_delivers_or_logs() {
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        send_best_effort(&sender, &Packet::Ack { block: 1 }, receiver.local_addr().unwrap())
            .await;
        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(Packet::decode(&buf[..len]).unwrap(), Packet::Ack { block: 1 });

        // An IPv4 socket cannot reach an IPv6 peer; the failure is logged, not raised.
        send_best_effort(&sender, &Packet::Ack { block: 2 }, "[::1]:69".parse().unwrap()).await;
    }
}
