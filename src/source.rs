//! Packet sources for the inspector: a file path or a `udp://` URL.
//!
//! UDP sockets are built with socket2 so multicast groups can be joined on a
//! chosen interface, then handed to tokio in non-blocking mode.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;

pub enum PacketSource {
    File { file: File, length: u64 },
    Udp(UdpSocket),
}

impl PacketSource {
    /// Open `input` as a UDP listener (`udp://group:port[?localaddr=a.b.c.d]`)
    /// or as a regular file.
    pub async fn open(input: &str) -> anyhow::Result<Self> {
        if input.starts_with("udp://") {
            let (addr, localaddr) = parse_udp_url(input)?;
            let socket = create_udp_socket(addr, localaddr)?;
            let sock = UdpSocket::from_std(socket.into())?;
            return Ok(PacketSource::Udp(sock));
        }

        let file = File::open(input)
            .await
            .with_context(|| format!("open {input}"))?;
        let length = file.metadata().await?.len();
        Ok(PacketSource::File { file, length })
    }

    /// True for file sources, where a zero-length read means end of stream.
    pub fn is_file(&self) -> bool {
        matches!(self, PacketSource::File { .. })
    }

    /// Total size when reading a file; streams have no known length.
    pub fn file_length(&self) -> Option<u64> {
        match self {
            PacketSource::File { length, .. } => Some(*length),
            PacketSource::Udp(_) => None,
        }
    }

    /// Fill `buf` with stream bytes. Returns 0 at end of file; a UDP read
    /// yields one datagram and never signals end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        match self {
            PacketSource::File { file, .. } => Ok(file.read(buf).await?),
            PacketSource::Udp(sock) => Ok(sock.recv(buf).await?),
        }
    }
}

/// Split a `udp://host:port[?key=val&...]` URL into the bind address and the
/// optional `localaddr` interface used for the multicast join.
fn parse_udp_url(url: &str) -> anyhow::Result<(SocketAddr, Option<Ipv4Addr>)> {
    let rest = &url["udp://".len()..];
    let (addr_part, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };

    let addr: SocketAddr = addr_part
        .parse()
        .with_context(|| format!("invalid udp address '{addr_part}'"))?;

    let mut localaddr = None;
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((key, val)) = pair.split_once('=') {
                if key == "localaddr" {
                    localaddr = Some(
                        val.parse()
                            .with_context(|| format!("invalid localaddr '{val}'"))?,
                    );
                }
                // buffer_size and friends are accepted and ignored
            }
        }
    }

    Ok((addr, localaddr))
}

/// Bind + (for multicast groups) join, reuse-addr on, non-blocking for tokio.
fn create_udp_socket(addr: SocketAddr, localaddr: Option<Ipv4Addr>) -> anyhow::Result<Socket> {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => v4,
        _ => anyhow::bail!("only IPv4 is supported"),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;

    if ip.is_multicast() {
        let iface = localaddr.unwrap_or(Ipv4Addr::UNSPECIFIED);
        socket.join_multicast_v4(&ip, &iface)?;
    }

    socket.set_nonblocking(true)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_udp_url() {
        let (addr, local) = parse_udp_url("udp://227.1.20.80:4002").unwrap();
        assert_eq!(addr.port(), 4002);
        assert!(local.is_none());
    }

    #[test]
    fn parses_localaddr_query() {
        let (addr, local) =
            parse_udp_url("udp://227.1.20.80:4002?localaddr=192.168.20.45&buffer_size=2500000")
                .unwrap();
        assert_eq!(addr.ip().to_string(), "227.1.20.80");
        assert_eq!(local, Some("192.168.20.45".parse().unwrap()));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_udp_url("udp://not-an-addr").is_err());
    }
}
