//! コンテナウォーカー
//!
//! ユーザー指定の参照（完全ID / IDプレフィックス / 名前）をコンテナに
//! 解決します。プレフィックスが複数に一致する場合は曖昧エラー、
//! 一致なしは未発見エラー。フィルタは解決後に適用されるため、
//! 曖昧性検出はフィルタの影響を受けない。

use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use bollard::models::ContainerSummary;
use std::collections::HashMap;
use tracing::debug;

/// 解決済みコンテナ
#[derive(Debug, Clone, Default)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub state: Option<String>,
    pub image: Option<String>,
}

impl ContainerRef {
    pub fn from_summary(summary: &ContainerSummary) -> Self {
        Self {
            id: summary.id.clone().unwrap_or_default(),
            name: summary
                .names
                .as_ref()
                .and_then(|names| names.first())
                .map(|name| name.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            labels: summary.labels.clone().unwrap_or_default(),
            state: summary.state.as_ref().map(|s| s.to_string()),
            image: summary.image.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.as_deref() == Some("running")
    }
}

/// コンテナ集合に対する参照解決（純粋関数）
///
/// 試行順: (1) 完全ID一致 (2) 一意なIDプレフィックス (3) 名前一致。
pub fn resolve<'a>(pattern: &str, containers: &'a [ContainerRef]) -> Result<Vec<&'a ContainerRef>> {
    // (1) 完全ID
    if let Some(exact) = containers.iter().find(|c| c.id == pattern) {
        return Ok(vec![exact]);
    }

    // (2) IDプレフィックス
    let prefix_matches: Vec<&ContainerRef> = containers
        .iter()
        .filter(|c| !pattern.is_empty() && c.id.starts_with(pattern))
        .collect();
    match prefix_matches.len() {
        1 => return Ok(prefix_matches),
        n if n > 1 => {
            let mut ids: Vec<String> = prefix_matches
                .iter()
                .map(|c| c.id.chars().take(12).collect())
                .collect();
            ids.sort();
            return Err(GatewayError::AmbiguousReference {
                pattern: pattern.to_string(),
                matches: ids.join(", "),
            });
        }
        _ => {}
    }

    // (3) 名前一致
    let name_matches: Vec<&ContainerRef> =
        containers.iter().filter(|c| c.name == pattern).collect();
    if name_matches.is_empty() {
        return Err(GatewayError::NoSuchReference(pattern.to_string()));
    }
    Ok(name_matches)
}

/// デーモンから全コンテナを取得して解決し、フィルタを適用
pub async fn walk(
    gateway: &Gateway,
    pattern: &str,
    filter: Option<&(dyn Fn(&ContainerRef) -> bool + Sync)>,
) -> Result<Vec<ContainerRef>> {
    let summaries = gateway.list_containers(&[], true).await?;
    let containers: Vec<ContainerRef> =
        summaries.iter().map(ContainerRef::from_summary).collect();

    let resolved = resolve(pattern, &containers)?;
    debug!(pattern, matched = resolved.len(), "Reference resolved");

    // 曖昧性検出を保つため、フィルタは解決後に適用する
    let filtered: Vec<ContainerRef> = resolved
        .into_iter()
        .filter(|c| filter.map(|f| f(c)).unwrap_or(true))
        .cloned()
        .collect();
    Ok(filtered)
}

/// 複数パターンをまとめて解決
///
/// require_all_match が立っている場合、一つでも空になれば失敗。
pub async fn walk_all(
    gateway: &Gateway,
    patterns: &[String],
    require_all_match: bool,
    filter: Option<&(dyn Fn(&ContainerRef) -> bool + Sync)>,
) -> Result<Vec<ContainerRef>> {
    let mut all = Vec::new();
    for pattern in patterns {
        match walk(gateway, pattern, filter).await {
            Ok(resolved) if resolved.is_empty() && require_all_match => {
                return Err(GatewayError::NoSuchReference(pattern.clone()));
            }
            Ok(resolved) => all.extend(resolved),
            Err(e) if require_all_match => return Err(e),
            Err(GatewayError::NoSuchReference(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(all)
}

/// 作成前の名前重複チェック
///
/// 同名コンテナが既に存在する場合は AlreadyExists。
pub async fn ensure_name_unique(gateway: &Gateway, name: &str) -> Result<()> {
    let summaries = gateway.list_containers(&[], true).await?;
    let taken = summaries.iter().any(|summary| {
        summary
            .names
            .as_ref()
            .map(|names| names.iter().any(|n| n.trim_start_matches('/') == name))
            .unwrap_or(false)
    });
    if taken {
        Err(GatewayError::AlreadyExists(name.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Vec<ContainerRef> {
        vec![
            ContainerRef {
                id: "abc123def456".to_string(),
                name: "myapp_web_1".to_string(),
                state: Some("running".to_string()),
                ..Default::default()
            },
            ContainerRef {
                id: "abc789aaa111".to_string(),
                name: "myapp_db_1".to_string(),
                state: Some("exited".to_string()),
                ..Default::default()
            },
            ContainerRef {
                id: "fff000bbb222".to_string(),
                name: "other_app_1".to_string(),
                state: Some("running".to_string()),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn test_resolve_exact_id() {
        let containers = fixture();
        let found = resolve("abc123def456", &containers).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "myapp_web_1");
    }

    #[test]
    fn test_resolve_unique_prefix() {
        let containers = fixture();
        let found = resolve("fff", &containers).unwrap();
        assert_eq!(found[0].name, "other_app_1");
    }

    #[test]
    fn test_resolve_ambiguous_prefix() {
        let containers = fixture();
        let err = resolve("abc", &containers).unwrap_err();
        match err {
            GatewayError::AmbiguousReference { pattern, matches } => {
                assert_eq!(pattern, "abc");
                assert!(matches.contains("abc123def456"));
                assert!(matches.contains("abc789aaa111"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_by_name() {
        let containers = fixture();
        let found = resolve("myapp_db_1", &containers).unwrap();
        assert_eq!(found[0].id, "abc789aaa111");
    }

    #[test]
    fn test_resolve_not_found() {
        let containers = fixture();
        let err = resolve("ghost", &containers).unwrap_err();
        assert!(matches!(err, GatewayError::NoSuchReference(p) if p == "ghost"));
    }

    #[test]
    fn test_resolve_prefers_exact_over_prefix() {
        // 完全ID一致は他のIDのプレフィックスでもあるケースに勝つ
        let containers = vec![
            ContainerRef {
                id: "aaa".to_string(),
                name: "one".to_string(),
                ..Default::default()
            },
            ContainerRef {
                id: "aaabbb".to_string(),
                name: "two".to_string(),
                ..Default::default()
            },
        ];
        let found = resolve("aaa", &containers).unwrap();
        assert_eq!(found[0].name, "one");
    }
}
