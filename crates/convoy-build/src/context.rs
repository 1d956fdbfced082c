use crate::error::{BuildError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::path::Path;
use tar::Builder;

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストをtar.gzアーカイブとして作成
    ///
    /// dockerfile がコンテキスト外にある場合は "Dockerfile" として
    /// アーカイブ先頭に差し込む。
    pub fn create_context(context_path: &Path, dockerfile: Option<&Path>) -> Result<Vec<u8>> {
        if !context_path.is_dir() {
            return Err(BuildError::ContextNotFound(context_path.to_path_buf()));
        }
        tracing::debug!("Creating build context from: {}", context_path.display());

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);

            // コンテキストディレクトリを再帰的に追加
            tar.append_dir_all(".", context_path)
                .map_err(BuildError::Io)?;

            // コンテキスト外のDockerfileは "Dockerfile" として追加
            if let Some(dockerfile_path) = dockerfile
                && !dockerfile_path.starts_with(context_path)
            {
                if !dockerfile_path.is_file() {
                    return Err(BuildError::DockerfileNotFound(
                        dockerfile_path.to_path_buf(),
                    ));
                }
                let content = std::fs::read(dockerfile_path)?;
                let mut header = tar::Header::new_gnu();
                header
                    .set_path("Dockerfile")
                    .map_err(BuildError::Io)?;
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                tar.append(&header, &content[..]).map_err(BuildError::Io)?;
            }

            tar.finish().map_err(BuildError::Io)?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());
        Self::check_context_size(archive_data.len());
        Ok(archive_data)
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: usize) {
        const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 .dockerignoreファイルで不要なファイルを除外することを推奨します。",
                size / 1024 / 1024
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_create_context_includes_files() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("file1.txt"), "content1").unwrap();
        let subdir = temp_dir.path().join("subdir");
        fs::create_dir(&subdir).unwrap();
        fs::write(subdir.join("file2.txt"), "content2").unwrap();
        fs::write(temp_dir.path().join("Dockerfile"), "FROM alpine").unwrap();

        let archive = ContextBuilder::create_context(temp_dir.path(), None).unwrap();
        assert!(!archive.is_empty());

        // tarアーカイブとして展開できるか確認
        let decoder = flate2::read::GzDecoder::new(std::io::Cursor::new(archive));
        let mut tar = tar::Archive::new(decoder);
        let names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n.contains("file1.txt")));
        assert!(names.iter().any(|n| n.contains("subdir")));
        assert!(names.iter().any(|n| n.contains("Dockerfile")));
    }

    #[test]
    fn test_create_context_external_dockerfile() {
        let context = tempdir().unwrap();
        fs::write(context.path().join("app.txt"), "app").unwrap();

        let elsewhere = tempdir().unwrap();
        let dockerfile = elsewhere.path().join("Dockerfile.release");
        fs::write(&dockerfile, "FROM scratch").unwrap();

        let archive =
            ContextBuilder::create_context(context.path(), Some(&dockerfile)).unwrap();

        let decoder = flate2::read::GzDecoder::new(std::io::Cursor::new(archive));
        let mut tar = tar::Archive::new(decoder);
        let names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n == "Dockerfile"));
    }

    #[test]
    fn test_missing_context_fails() {
        let err =
            ContextBuilder::create_context(Path::new("/nonexistent/ctx"), None).unwrap_err();
        assert!(matches!(err, BuildError::ContextNotFound(_)));
    }
}
