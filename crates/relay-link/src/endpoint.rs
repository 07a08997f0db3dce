use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint {0:?} has no transport prefix (expected e.g. udp:host:port)")]
    MissingTransport(String),
    #[error("unknown transport {0:?}")]
    UnknownTransport(String),
    #[error("bad address {0:?} (expected host:port)")]
    BadAddress(String),
    #[error("serial endpoint {0:?} names no device")]
    MissingDevice(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    UdpIn,
    UdpOut,
    UdpBcast,
    TcpIn,
    TcpOut,
    Serial,
}

impl Transport {
    fn prefix(self) -> &'static str {
        match self {
            Transport::UdpIn => "udpin",
            Transport::UdpOut => "udpout",
            Transport::UdpBcast => "udpbcast",
            Transport::TcpIn => "tcpin",
            Transport::TcpOut => "tcpout",
            Transport::Serial => "serial",
        }
    }
}

impl FromStr for Transport {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // bare udp listens, bare tcp dials out
        match s.to_ascii_lowercase().as_str() {
            "udp" | "udpin" => Ok(Transport::UdpIn),
            "udpout" => Ok(Transport::UdpOut),
            "udpbcast" => Ok(Transport::UdpBcast),
            "tcp" | "tcpout" => Ok(Transport::TcpOut),
            "tcpin" => Ok(Transport::TcpIn),
            "serial" => Ok(Transport::Serial),
            other => Err(EndpointError::UnknownTransport(other.to_string())),
        }
    }
}

/// A parsed vehicle-link descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub transport: Transport,
    /// `host:port` for network transports, the device path for serial.
    pub address: String,
    /// Serial only.
    pub baud: Option<u32>,
}

impl Endpoint {
    /// Parses `transport:address`. Serial descriptors may end in `:baud`;
    /// without one they take `default_baud`.
    pub fn parse(desc: &str, default_baud: u32) -> Result<Self, EndpointError> {
        let desc = desc.trim();
        let (scheme, rest) = desc
            .split_once(':')
            .ok_or_else(|| EndpointError::MissingTransport(desc.to_string()))?;
        let transport: Transport = scheme.parse()?;

        if transport == Transport::Serial {
            let (device, baud) = match rest.rsplit_once(':') {
                Some((dev, b)) if !dev.is_empty() && b.parse::<u32>().is_ok() => {
                    (dev, b.parse::<u32>().ok())
                }
                _ => (rest, Some(default_baud)),
            };
            if device.is_empty() {
                return Err(EndpointError::MissingDevice(desc.to_string()));
            }
            return Ok(Self { transport, address: device.to_string(), baud });
        }

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::BadAddress(rest.to_string()))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(EndpointError::BadAddress(rest.to_string()));
        }
        Ok(Self { transport, address: rest.to_string(), baud: None })
    }

    pub fn is_serial(&self) -> bool {
        self.transport == Transport::Serial
    }

    /// Address string understood by `mavlink::connect`.
    pub fn mavlink_url(&self) -> String {
        match (self.transport, self.baud) {
            (Transport::Serial, Some(baud)) => format!("serial:{}:{}", self.address, baud),
            (t, _) => format!("{}:{}", t.prefix(), self.address),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mavlink_url())
    }
}
