use crate::error::{BuildError, Result};
use bollard::Docker;
use bollard::image::BuildImageOptions;
use colored::Colorize;
use futures_util::stream::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// イメージをビルド
    #[allow(deprecated)]
    pub async fn build_image(
        &self,
        context_data: Vec<u8>,
        tag: &str,
        dockerfile: &str,
        build_args: HashMap<String, String>,
        target: Option<&str>,
        cache_from: &[String],
        no_cache: bool,
    ) -> Result<()> {
        tracing::info!("Building image: {}", tag);

        // build_argsを&str型に変換
        let build_args_refs: HashMap<&str, &str> = build_args
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let options = BuildImageOptions {
            dockerfile,
            t: tag,
            buildargs: build_args_refs,
            target: target.unwrap_or(""),
            cachefrom: cache_from.iter().map(String::as_str).collect(),
            nocache: no_cache,
            rm: true,      // 中間コンテナを削除
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            ..Default::default()
        };

        tracing::debug!("Build options: {:?}", options);

        // ビルドストリームの開始
        use bytes::Bytes;
        use http_body_util::{Either, Full};
        let body = Full::new(Bytes::from(context_data));
        let mut stream = self
            .docker
            .build_image(options, None, Some(Either::Left(body)));

        // ビルド進捗の表示
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(output) => self.handle_build_output(output)?,
                Err(e) => return Err(BuildError::DockerConnection(e)),
            }
        }

        tracing::info!("Successfully built: {}", tag);
        Ok(())
    }

    /// ビルド出力の処理
    fn handle_build_output(&self, output: bollard::models::BuildInfo) -> Result<()> {
        if let Some(stream) = output.stream {
            print!("{}", stream);
        }

        if let Some(error) = output.error {
            return Err(BuildError::BuildFailed(error));
        }

        if let Some(error_detail) = output.error_detail {
            let error_msg = error_detail
                .message
                .unwrap_or_else(|| "Unknown build error".to_string());
            return Err(BuildError::BuildFailed(error_msg));
        }

        if let Some(status) = output.status {
            // ステータスメッセージ（pull等）
            println!("{}", status.cyan());
        }

        Ok(())
    }

    /// イメージの存在確認
    pub async fn image_exists(&self, image_tag: &str) -> Result<bool> {
        match self.docker.inspect_image(image_tag).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(BuildError::DockerConnection(e)),
        }
    }
}

/// ビルドのフィンガープリント
///
/// コンテキスト内容 + Dockerfileパス + ビルド引数 + ターゲットの
/// ハッシュ。同一フィンガープリントのビルドは一回のみ実行される。
pub fn build_fingerprint(
    context_data: &[u8],
    dockerfile: &str,
    build_args: &HashMap<String, String>,
    target: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(context_data);
    hasher.update(dockerfile.as_bytes());

    let mut keys: Vec<&String> = build_args.keys().collect();
    keys.sort();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(build_args[key].as_bytes());
    }
    if let Some(target) = target {
        hasher.update(target.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let args: HashMap<String, String> =
            [("A".to_string(), "1".to_string())].into_iter().collect();
        let first = build_fingerprint(b"ctx", "Dockerfile", &args, Some("release"));
        let second = build_fingerprint(b"ctx", "Dockerfile", &args, Some("release"));
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_inputs() {
        let args = HashMap::new();
        let base = build_fingerprint(b"ctx", "Dockerfile", &args, None);
        assert_ne!(base, build_fingerprint(b"ctx2", "Dockerfile", &args, None));
        assert_ne!(base, build_fingerprint(b"ctx", "Dockerfile.dev", &args, None));
        assert_ne!(base, build_fingerprint(b"ctx", "Dockerfile", &args, Some("t")));

        let with_args: HashMap<String, String> =
            [("A".to_string(), "1".to_string())].into_iter().collect();
        assert_ne!(base, build_fingerprint(b"ctx", "Dockerfile", &with_args, None));
    }

    #[test]
    fn test_fingerprint_ignores_arg_order() {
        let mut left = HashMap::new();
        left.insert("A".to_string(), "1".to_string());
        left.insert("B".to_string(), "2".to_string());
        let mut right = HashMap::new();
        right.insert("B".to_string(), "2".to_string());
        right.insert("A".to_string(), "1".to_string());
        assert_eq!(
            build_fingerprint(b"c", "Dockerfile", &left, None),
            build_fingerprint(b"c", "Dockerfile", &right, None)
        );
    }
}
