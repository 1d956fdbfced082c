//! ネットワーク定義

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// トップレベルの `networks:` 配下の一項目
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    pub driver: Option<String>,
    #[serde(default)]
    pub subnets: Vec<String>,
    pub gateway: Option<String>,
    #[serde(default)]
    pub options: HashMap<String, String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// true の場合、convoyは作成も削除もしない
    #[serde(default)]
    pub external: bool,
}

/// 暗黙の default ネットワークのキー
pub const DEFAULT_NETWORK: &str = "default";
