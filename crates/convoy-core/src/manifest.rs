//! マニフェストの生データモデル
//!
//! YAML の柔軟な書式（map/list 両対応の environment、string/object 両対応の
//! build など）をそのまま受けるための serde モデルと、複数ファイルの
//! キー単位マージを定義します。検証と正規化は loader が行います。

use serde::Deserialize;
use std::collections::HashMap;

/// マニフェストファイル一枚分
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComposeFile {
    /// 互換のために受けるだけで、解釈はしない
    pub version: Option<String>,
    #[serde(default)]
    pub services: HashMap<String, RawService>,
    #[serde(default)]
    pub networks: HashMap<String, Option<RawNetwork>>,
    #[serde(default)]
    pub volumes: HashMap<String, Option<RawVolume>>,
}

impl ComposeFile {
    /// 後勝ちマージ
    ///
    /// サービス配下のリスト値キー（ports, environment, volumes, depends_on
    /// など）は追記、スカラーキー（image, command など）は置換。
    /// networks / volumes のトップレベル項目はキー単位で置換。
    pub fn merge(&mut self, other: ComposeFile) {
        if other.version.is_some() {
            self.version = other.version;
        }
        for (name, service) in other.services {
            match self.services.get_mut(&name) {
                Some(base) => base.merge(service),
                None => {
                    self.services.insert(name, service);
                }
            }
        }
        self.networks.extend(other.networks);
        self.volumes.extend(other.volumes);
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawService {
    pub image: Option<String>,
    pub build: Option<RawBuild>,
    pub command: Option<StringOrList>,
    pub entrypoint: Option<StringOrList>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub environment: Option<RawEnv>,
    pub env_file: Option<StringOrList>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<RawVolumeMount>,
    pub networks: Option<RawServiceNetworks>,
    pub depends_on: Option<RawDependsOn>,
    pub healthcheck: Option<RawHealthCheck>,
    pub restart: Option<String>,
    pub scale: Option<u32>,
    pub deploy: Option<RawDeploy>,
    #[serde(default)]
    pub profiles: Vec<String>,
    pub pull_policy: Option<String>,
    pub stop_grace_period: Option<RawDuration>,
    pub stop_signal: Option<String>,
    pub init: Option<bool>,
    pub privileged: Option<bool>,
    pub read_only: Option<bool>,
    pub tty: Option<bool>,
    pub stdin_open: Option<bool>,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub cap_drop: Vec<String>,
    #[serde(default)]
    pub security_opt: Vec<String>,
    pub sysctls: Option<RawEnv>,
    #[serde(default)]
    pub tmpfs: Option<StringOrList>,
    #[serde(default)]
    pub ulimits: HashMap<String, RawUlimit>,
}

impl RawService {
    fn merge(&mut self, other: RawService) {
        // スカラー: 後勝ちで置換
        macro_rules! replace {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        replace!(
            image,
            build,
            command,
            entrypoint,
            working_dir,
            user,
            hostname,
            healthcheck,
            restart,
            scale,
            deploy,
            pull_policy,
            stop_grace_period,
            stop_signal,
            init,
            privileged,
            read_only,
            tty,
            stdin_open,
            tmpfs
        );

        // リスト: 追記
        self.ports.extend(other.ports);
        self.volumes.extend(other.volumes);
        self.cap_add.extend(other.cap_add);
        self.cap_drop.extend(other.cap_drop);
        self.security_opt.extend(other.security_opt);
        self.profiles.extend(other.profiles);
        self.ulimits.extend(other.ulimits);

        // environment: リストはエントリ追記、マップはキー上書き
        self.environment = match (self.environment.take(), other.environment) {
            (Some(base), Some(overlay)) => Some(base.merged(overlay)),
            (base, overlay) => overlay.or(base),
        };
        self.sysctls = match (self.sysctls.take(), other.sysctls) {
            (Some(base), Some(overlay)) => Some(base.merged(overlay)),
            (base, overlay) => overlay.or(base),
        };
        self.env_file = match (self.env_file.take(), other.env_file) {
            (Some(base), Some(overlay)) => Some(base.appended(overlay)),
            (base, overlay) => overlay.or(base),
        };

        // depends_on / networks も追記
        self.depends_on = match (self.depends_on.take(), other.depends_on) {
            (Some(base), Some(overlay)) => Some(base.appended(overlay)),
            (base, overlay) => overlay.or(base),
        };
        self.networks = match (self.networks.take(), other.networks) {
            (Some(base), Some(overlay)) => Some(base.appended(overlay)),
            (base, overlay) => overlay.or(base),
        };
    }
}

/// `文字列` または `文字列のリスト`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    /// コマンド系はスペース区切りで分割、リストはそのまま
    pub fn into_args(self) -> Vec<String> {
        match self {
            Self::One(s) => s.split_whitespace().map(String::from).collect(),
            Self::Many(list) => list,
        }
    }

    /// ファイル名のように分割したくない場合
    pub fn into_list(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(list) => list,
        }
    }

    fn appended(self, other: StringOrList) -> StringOrList {
        let mut list = self.into_list();
        list.extend(other.into_list());
        StringOrList::Many(list)
    }
}

/// `KEY: value` のマップ、または `KEY=value` のリスト
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawEnv {
    Map(HashMap<String, Option<EnvScalar>>),
    List(Vec<String>),
}

/// YAML スカラーを文字列として受ける（`DEBUG: true` や `PORT: 8080` 対応）
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EnvScalar {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl EnvScalar {
    fn render(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
        }
    }
}

impl RawEnv {
    pub fn into_map(self) -> HashMap<String, String> {
        match self {
            Self::Map(map) => map
                .into_iter()
                .map(|(k, v)| (k, v.map(|s| s.render()).unwrap_or_default()))
                .collect(),
            Self::List(list) => list
                .into_iter()
                .map(|entry| match entry.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (entry, String::new()),
                })
                .collect(),
        }
    }

    fn merged(self, other: RawEnv) -> RawEnv {
        let mut map = self.into_map();
        map.extend(other.into_map());
        RawEnv::Map(
            map.into_iter()
                .map(|(k, v)| (k, Some(EnvScalar::String(v))))
                .collect(),
        )
    }
}

/// `build: ./dir` または `build: {context: ..., dockerfile: ...}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawBuild {
    Context(String),
    Detailed {
        context: String,
        dockerfile: Option<String>,
        #[serde(default)]
        args: HashMap<String, Option<EnvScalar>>,
        target: Option<String>,
        #[serde(default)]
        cache_from: Vec<String>,
        #[serde(default)]
        secrets: Vec<String>,
    },
}

/// `depends_on: [a, b]` または `depends_on: {a: {condition: ...}}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDependsOn {
    List(Vec<String>),
    Map(HashMap<String, RawDependEntry>),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDependEntry {
    pub condition: Option<String>,
}

impl RawDependsOn {
    fn appended(self, other: RawDependsOn) -> RawDependsOn {
        let mut map = self.into_entries();
        map.extend(other.into_entries());
        RawDependsOn::Map(map)
    }

    pub fn into_entries(self) -> HashMap<String, RawDependEntry> {
        match self {
            Self::List(list) => list
                .into_iter()
                .map(|name| (name, RawDependEntry::default()))
                .collect(),
            Self::Map(map) => map,
        }
    }
}

/// `networks: [front]` または `networks: {front: {aliases: [...]}}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawServiceNetworks {
    List(Vec<String>),
    Map(HashMap<String, Option<RawNetworkAttachment>>),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNetworkAttachment {
    #[serde(default)]
    pub aliases: Vec<String>,
    pub ipv4_address: Option<String>,
}

impl RawServiceNetworks {
    fn appended(self, other: RawServiceNetworks) -> RawServiceNetworks {
        let mut map = self.into_attachments();
        map.extend(other.into_attachments());
        RawServiceNetworks::Map(map.into_iter().map(|(k, v)| (k, Some(v))).collect())
    }

    pub fn into_attachments(self) -> HashMap<String, RawNetworkAttachment> {
        match self {
            Self::List(list) => list
                .into_iter()
                .map(|name| (name, RawNetworkAttachment::default()))
                .collect(),
            Self::Map(map) => map
                .into_iter()
                .map(|(k, v)| (k, v.unwrap_or_default()))
                .collect(),
        }
    }
}

/// `"src:dst:mode"` または `{source: ..., target: ..., read_only: ...}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawVolumeMount {
    Short(String),
    Long {
        source: Option<String>,
        target: String,
        #[serde(default)]
        read_only: bool,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHealthCheck {
    pub test: Option<StringOrList>,
    pub interval: Option<RawDuration>,
    pub timeout: Option<RawDuration>,
    pub retries: Option<u64>,
    pub start_period: Option<RawDuration>,
    #[serde(default)]
    pub disable: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDeploy {
    pub replicas: Option<u32>,
}

/// 秒数、または `90s` / `2m` / `1h30m` 形式
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDuration {
    Seconds(u64),
    Text(String),
}

impl RawDuration {
    /// 秒に正規化。パースできない場合は None
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Self::Seconds(secs) => Some(*secs),
            Self::Text(text) => parse_duration_secs(text),
        }
    }
}

fn parse_duration_secs(text: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let mut number = String::new();
    let mut seen_unit = false;

    for c in text.trim().chars() {
        if c.is_ascii_digit() {
            number.push(c);
        } else {
            let value: u64 = number.parse().ok()?;
            number.clear();
            let unit = match c {
                's' => 1,
                'm' => 60,
                'h' => 3600,
                _ => return None,
            };
            total += value * unit;
            seen_unit = true;
        }
    }

    if !number.is_empty() {
        // 単位なしの残りは秒として扱う
        total += number.parse::<u64>().ok()?;
    } else if !seen_unit {
        return None;
    }
    Some(total)
}

/// `soft/hard` オブジェクトまたは単一値
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawUlimit {
    Single(i64),
    Pair { soft: i64, hard: i64 },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNetwork {
    pub driver: Option<String>,
    pub ipam: Option<RawIpam>,
    #[serde(default)]
    pub driver_opts: HashMap<String, String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub external: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIpam {
    #[serde(default)]
    pub config: Vec<RawIpamConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIpamConfig {
    pub subnet: Option<String>,
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVolume {
    pub driver: Option<String>,
    #[serde(default)]
    pub driver_opts: HashMap<String, String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub external: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_environment_forms() {
        let map_form: ComposeFile = serde_yaml::from_str(
            r#"
services:
  api:
    image: myapp
    environment:
      DEBUG: true
      PORT: 8080
"#,
        )
        .unwrap();
        let env = map_form.services["api"]
            .environment
            .clone()
            .unwrap()
            .into_map();
        assert_eq!(env["DEBUG"], "true");
        assert_eq!(env["PORT"], "8080");

        let list_form: ComposeFile = serde_yaml::from_str(
            r#"
services:
  api:
    image: myapp
    environment:
      - DEBUG=true
      - EMPTY
"#,
        )
        .unwrap();
        let env = list_form.services["api"]
            .environment
            .clone()
            .unwrap()
            .into_map();
        assert_eq!(env["DEBUG"], "true");
        assert_eq!(env["EMPTY"], "");
    }

    #[test]
    fn test_parse_depends_on_forms() {
        let file: ComposeFile = serde_yaml::from_str(
            r#"
services:
  app:
    image: alpine
    depends_on:
      - db
  worker:
    image: alpine
    depends_on:
      db:
        condition: service_healthy
"#,
        )
        .unwrap();

        let app = file.services["app"].depends_on.clone().unwrap();
        assert!(app.into_entries().contains_key("db"));

        let worker = file.services["worker"].depends_on.clone().unwrap();
        let entries = worker.into_entries();
        assert_eq!(
            entries["db"].condition.as_deref(),
            Some("service_healthy")
        );
    }

    #[test]
    fn test_parse_build_forms() {
        let file: ComposeFile = serde_yaml::from_str(
            r#"
services:
  short:
    build: ./app
  long:
    build:
      context: .
      dockerfile: docker/Dockerfile
      target: release
      args:
        RUST_VERSION: "1.80"
"#,
        )
        .unwrap();

        assert!(matches!(
            file.services["short"].build,
            Some(RawBuild::Context(ref c)) if c == "./app"
        ));
        match file.services["long"].build.clone().unwrap() {
            RawBuild::Detailed {
                context,
                dockerfile,
                target,
                ..
            } => {
                assert_eq!(context, ".");
                assert_eq!(dockerfile.as_deref(), Some("docker/Dockerfile"));
                assert_eq!(target.as_deref(), Some("release"));
            }
            _ => panic!("expected detailed build"),
        }
    }

    #[test]
    fn test_merge_scalars_replace_lists_append() {
        let mut base: ComposeFile = serde_yaml::from_str(
            r#"
services:
  web:
    image: nginx:1.24
    ports:
      - "8080:80"
    environment:
      A: "1"
"#,
        )
        .unwrap();
        let overlay: ComposeFile = serde_yaml::from_str(
            r#"
services:
  web:
    image: nginx:1.25
    ports:
      - "8443:443"
    environment:
      B: "2"
"#,
        )
        .unwrap();

        base.merge(overlay);
        let web = &base.services["web"];
        assert_eq!(web.image.as_deref(), Some("nginx:1.25"));
        assert_eq!(web.ports, vec!["8080:80", "8443:443"]);
        let env = web.environment.clone().unwrap().into_map();
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "2");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(RawDuration::Seconds(15).as_secs(), Some(15));
        assert_eq!(RawDuration::Text("90s".into()).as_secs(), Some(90));
        assert_eq!(RawDuration::Text("2m".into()).as_secs(), Some(120));
        assert_eq!(RawDuration::Text("1h30m".into()).as_secs(), Some(5400));
        assert_eq!(RawDuration::Text("abc".into()).as_secs(), None);
    }
}
