//! 環境変数補間
//!
//! マニフェスト本文の `${VAR}` / `${VAR:-default}` をパース前に展開します。
//! 変数は env ファイルとプロセス環境からロードされ、プロセス環境が優先。

use crate::error::{ComposeError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// 補間変数の集合
pub type Variables = HashMap<String, String>;

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // ${VAR} / ${VAR:-default}
        Regex::new(r"\$\{(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?::-(?P<default>[^}]*))?\}").unwrap()
    })
}

/// テキスト全体を補間する
///
/// 未定義変数はデフォルト値が無い限りエラー。`$$` はエスケープとして `$` になる。
pub fn interpolate(text: &str, variables: &Variables) -> Result<String> {
    let mut missing: Option<String> = None;

    let replaced = var_pattern().replace_all(text, |caps: &regex::Captures| {
        let name = &caps["name"];
        match variables.get(name) {
            Some(value) => value.clone(),
            None => match caps.name("default") {
                Some(default) => default.as_str().to_string(),
                None => {
                    if missing.is_none() {
                        missing = Some(name.to_string());
                    }
                    String::new()
                }
            },
        }
    });

    if let Some(name) = missing {
        return Err(ComposeError::UndefinedVariable(name));
    }

    Ok(replaced.replace("$$", "$"))
}

/// KEY=VALUE 形式の env ファイルを読み込む
///
/// `#` 始まりの行と空行は無視。値の前後の引用符は剥がす。
pub fn load_env_file(path: &Path) -> Result<Variables> {
    let content = std::fs::read_to_string(path).map_err(|e| ComposeError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut variables = Variables::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            variables.insert(key.trim().to_string(), value.to_string());
        }
    }
    debug!(path = %path.display(), count = variables.len(), "Loaded env file");
    Ok(variables)
}

/// env ファイル（あれば）とプロセス環境をマージした変数集合を作る
///
/// プロセス環境が最優先。
pub fn collect_variables(project_dir: &Path) -> Result<Variables> {
    let mut variables = Variables::new();

    let env_file = project_dir.join(".env");
    if env_file.is_file() {
        variables.extend(load_env_file(&env_file)?);
    }

    // プロセス環境で上書き
    for (key, value) in std::env::vars() {
        variables.insert(key, value);
    }

    Ok(variables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_interpolate_simple() {
        let variables = vars(&[("TAG", "3.18")]);
        let result = interpolate("image: alpine:${TAG}", &variables).unwrap();
        assert_eq!(result, "image: alpine:3.18");
    }

    #[test]
    fn test_interpolate_default() {
        let variables = Variables::new();
        let result = interpolate("image: alpine:${TAG:-latest}", &variables).unwrap();
        assert_eq!(result, "image: alpine:latest");
    }

    #[test]
    fn test_interpolate_default_ignored_when_set() {
        let variables = vars(&[("TAG", "edge")]);
        let result = interpolate("${TAG:-latest}", &variables).unwrap();
        assert_eq!(result, "edge");
    }

    #[test]
    fn test_interpolate_undefined_fails() {
        let variables = Variables::new();
        let err = interpolate("${MISSING}", &variables).unwrap_err();
        assert!(matches!(err, ComposeError::UndefinedVariable(name) if name == "MISSING"));
    }

    #[test]
    fn test_interpolate_dollar_escape() {
        let variables = Variables::new();
        let result = interpolate("price: $$5", &variables).unwrap();
        assert_eq!(result, "price: $5");
    }

    #[test]
    fn test_load_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# comment\nREGISTRY=ghcr.io/myorg\nTAG=\"v1.2.3\"\n\nQUOTED='single'\n",
        )
        .unwrap();

        let variables = load_env_file(&path).unwrap();
        assert_eq!(variables["REGISTRY"], "ghcr.io/myorg");
        assert_eq!(variables["TAG"], "v1.2.3");
        assert_eq!(variables["QUOTED"], "single");
        assert_eq!(variables.len(), 3);
    }
}
