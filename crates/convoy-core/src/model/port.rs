//! ポート定義

use crate::error::{ComposeError, Result};
use serde::{Deserialize, Serialize};

/// プロトコル種別
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// ホストとコンテナのポート対応
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub host_ip: Option<String>,
}

/// `[host_ip:]host_port[-host_port_range]:container_port[/proto]` 形式をパース
///
/// ホスト側に範囲が指定された場合、コンテナ側も同じ幅の範囲が必要。
/// 範囲は個別の PortMapping に展開される。
pub fn parse_port_spec(spec: &str) -> Result<Vec<PortMapping>> {
    let invalid = || ComposeError::InvalidPort(spec.to_string());

    // プロトコル部を分離
    let (body, protocol) = match spec.rsplit_once('/') {
        Some((body, "tcp")) => (body, Protocol::Tcp),
        Some((body, "udp")) => (body, Protocol::Udp),
        Some(_) => return Err(invalid()),
        None => (spec, Protocol::Tcp),
    };

    // 末尾から container 部を分離（先頭は host_ip を含む可能性がある）
    let (front, container_part) = body.rsplit_once(':').ok_or_else(invalid)?;

    // host_ip:host_port または host_port
    let (host_ip, host_part) = match front.rsplit_once(':') {
        Some((ip, port)) => (Some(ip.to_string()), port),
        None => (None, front),
    };

    let host_range = parse_range(host_part).ok_or_else(invalid)?;
    let container_range = parse_range(container_part).ok_or_else(invalid)?;

    if host_range.len() != container_range.len() {
        return Err(invalid());
    }

    Ok(host_range
        .zip(container_range)
        .map(|(host, container)| PortMapping {
            host,
            container,
            protocol,
            host_ip: host_ip.clone(),
        })
        .collect())
}

/// `N` または `N-M` を範囲としてパース
fn parse_range(s: &str) -> Option<std::ops::RangeInclusive<u16>> {
    match s.split_once('-') {
        Some((lo, hi)) => {
            let lo: u16 = lo.parse().ok()?;
            let hi: u16 = hi.parse().ok()?;
            (lo <= hi).then_some(lo..=hi)
        }
        None => {
            let port: u16 = s.parse().ok()?;
            Some(port..=port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_port() {
        let ports = parse_port_spec("8080:80").unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].host, 8080);
        assert_eq!(ports[0].container, 80);
        assert_eq!(ports[0].protocol, Protocol::Tcp);
        assert_eq!(ports[0].host_ip, None);
    }

    #[test]
    fn test_parse_port_with_host_ip() {
        let ports = parse_port_spec("127.0.0.1:5432:5432").unwrap();
        assert_eq!(ports[0].host_ip, Some("127.0.0.1".to_string()));
        assert_eq!(ports[0].host, 5432);
        assert_eq!(ports[0].container, 5432);
    }

    #[test]
    fn test_parse_udp_port() {
        let ports = parse_port_spec("53:53/udp").unwrap();
        assert_eq!(ports[0].protocol, Protocol::Udp);
    }

    #[test]
    fn test_parse_port_range() {
        let ports = parse_port_spec("8080-8082:9080-9082").unwrap();
        assert_eq!(ports.len(), 3);
        assert_eq!(ports[0].host, 8080);
        assert_eq!(ports[0].container, 9080);
        assert_eq!(ports[2].host, 8082);
        assert_eq!(ports[2].container, 9082);
    }

    #[test]
    fn test_parse_port_range_mismatch() {
        // ホスト側とコンテナ側の幅が違う場合はエラー
        assert!(parse_port_spec("8080-8082:80").is_err());
    }

    #[test]
    fn test_parse_invalid_port() {
        assert!(parse_port_spec("abc:80").is_err());
        assert!(parse_port_spec("8080").is_err());
        assert!(parse_port_spec("8080:80/sctp").is_err());
    }
}
