use crate::service::MetricsService;
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use telemon_common::crypto::Decryptor;
use telemon_common::hash::HashKey;

/// Header (and gRPC metadata key) carrying the agent's own address.
pub const REAL_IP_HEADER: &str = "x-real-ip";

#[derive(Clone)]
pub struct AppState {
    pub service: MetricsService,
    /// Shared secret for request verification and response signing.
    pub hash_key: Option<HashKey>,
    pub decryptor: Option<Arc<Decryptor>>,
    pub trusted_subnet: Option<IpNet>,
}

impl AppState {
    pub fn new(service: MetricsService) -> Self {
        Self {
            service,
            hash_key: None,
            decryptor: None,
            trusted_subnet: None,
        }
    }
}

/// Why a source address was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("missing {REAL_IP_HEADER}")]
    Missing,
    #[error("malformed {REAL_IP_HEADER} '{0}'")]
    Malformed(String),
    #[error("address {0} is outside the trusted subnet")]
    Untrusted(IpAddr),
}

/// Checks a reported source address against the trusted subnet.
///
/// ```
/// use telemon_server::state::{admit, AdmissionError};
///
/// let subnet = "10.0.0.0/8".parse().unwrap();
/// assert!(admit(&subnet, Some("10.1.2.3")).is_ok());
/// assert_eq!(admit(&subnet, None), Err(AdmissionError::Missing));
/// assert!(matches!(admit(&subnet, Some("192.168.0.1")), Err(AdmissionError::Untrusted(_))));
/// ```
pub fn admit(subnet: &IpNet, real_ip: Option<&str>) -> Result<IpAddr, AdmissionError> {
    let raw = real_ip.map(str::trim).filter(|s| !s.is_empty());
    let raw = raw.ok_or(AdmissionError::Missing)?;
    let ip: IpAddr = raw
        .parse()
        .map_err(|_| AdmissionError::Malformed(raw.to_string()))?;
    if subnet.contains(&ip) {
        Ok(ip)
    } else {
        Err(AdmissionError::Untrusted(ip))
    }
}
