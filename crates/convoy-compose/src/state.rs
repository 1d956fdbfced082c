//! 表示状態のサイドカー
//!
//! プロジェクトごとにログプレフィックスの幅と色割り当てをデータ
//! ディレクトリに保存し、実行をまたいで出力を安定させます。
//! ファイルが無くても壊れていても動作には影響しない（best-effort）。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayState {
    /// 前回のプレフィックス幅
    #[serde(default)]
    pub prefix_width: usize,
    /// サービス名 → パレットの色インデックス
    #[serde(default)]
    pub colors: HashMap<String, usize>,
}

/// `<data_dir>/convoy/<project>/display.json`
fn state_path(project_name: &str) -> Option<PathBuf> {
    dirs::data_dir().map(|dir| {
        dir.join("convoy")
            .join(project_name)
            .join("display.json")
    })
}

impl DisplayState {
    /// 読み込み。欠損・破損は空として扱う
    pub fn load(project_name: &str) -> Self {
        let Some(path) = state_path(project_name) else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// 保存。失敗しても呼び出し元には伝播しない
    pub fn save(&self, project_name: &str) {
        let Some(path) = state_path(project_name) else {
            return;
        };
        if let Some(parent) = path.parent()
            && std::fs::create_dir_all(parent).is_err()
        {
            return;
        }
        match serde_json::to_string_pretty(self) {
            Ok(content) => {
                if let Err(e) = std::fs::write(&path, content) {
                    debug!(path = %path.display(), error = %e, "Display state not saved");
                }
            }
            Err(_) => {}
        }
    }

    /// 今回の実行結果を取り込む
    pub fn record(&mut self, prefix_width: usize, services: &[String]) {
        self.prefix_width = self.prefix_width.max(prefix_width);
        for service in services {
            self.colors
                .entry(service.clone())
                .or_insert_with(|| crate::logmux::color_index(service));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_max_width_and_colors() {
        let mut state = DisplayState::default();
        state.record(8, &["web".to_string(), "db".to_string()]);
        assert_eq!(state.prefix_width, 8);
        assert_eq!(state.colors.len(), 2);

        // 幅は縮まない、色は変わらない
        let web_color = state.colors["web"];
        state.record(5, &["web".to_string()]);
        assert_eq!(state.prefix_width, 8);
        assert_eq!(state.colors["web"], web_color);
    }

    #[test]
    fn test_roundtrip_via_json() {
        let mut state = DisplayState::default();
        state.record(6, &["api".to_string()]);
        let json = serde_json::to_string(&state).unwrap();
        let restored: DisplayState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.prefix_width, 6);
        assert_eq!(restored.colors["api"], state.colors["api"]);
    }

    #[test]
    fn test_load_missing_is_default() {
        let state = DisplayState::load("no-such-project-for-tests");
        assert_eq!(state.prefix_width, 0);
        assert!(state.colors.is_empty());
    }
}
