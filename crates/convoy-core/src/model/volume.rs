//! ボリューム定義

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// トップレベルの `volumes:` 配下の一項目
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Volume {
    pub driver: Option<String>,
    #[serde(default)]
    pub driver_opts: HashMap<String, String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// true の場合、convoyは作成も削除もしない
    #[serde(default)]
    pub external: bool,
}

/// サービスのボリュームマウント
///
/// source の形が `/` か `./` `../` で始まる場合はバインドマウント、
/// それ以外は名前付きボリューム。source 無しは匿名ボリューム。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: Option<String>,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeMount {
    /// バインドマウントかどうか
    pub fn is_bind(&self) -> bool {
        match &self.source {
            Some(s) => s.starts_with('/') || s.starts_with("./") || s.starts_with("../"),
            None => false,
        }
    }

    /// 名前付きボリュームの場合、その名前を返す
    pub fn volume_name(&self) -> Option<&str> {
        match &self.source {
            Some(s) if !self.is_bind() => Some(s.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_mount_detection() {
        let bind = VolumeMount {
            source: Some("/data".to_string()),
            target: "/var/lib/data".to_string(),
            read_only: false,
        };
        assert!(bind.is_bind());
        assert_eq!(bind.volume_name(), None);

        let relative = VolumeMount {
            source: Some("./conf".to_string()),
            target: "/etc/conf".to_string(),
            read_only: true,
        };
        assert!(relative.is_bind());

        let named = VolumeMount {
            source: Some("pgdata".to_string()),
            target: "/var/lib/postgresql/data".to_string(),
            read_only: false,
        };
        assert!(!named.is_bind());
        assert_eq!(named.volume_name(), Some("pgdata"));

        let anonymous = VolumeMount {
            source: None,
            target: "/tmp/scratch".to_string(),
            read_only: false,
        };
        assert!(!anonymous.is_bind());
        assert_eq!(anonymous.volume_name(), None);
    }
}
