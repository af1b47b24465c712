//! # config：端（End）级配置
//!
//! ## 意图（Why）
//! - 集中描述 Front/Back 共享的运行参数：缺省超时、超时上限、初始流控额度与 Front 的方法表；
//! - 以 `serde` + `toml` 落地，便于宿主以文件或内嵌字符串注入，与工作区其他 crate 的配置习惯一致。
//!
//! ## 契约（What）
//! - 所有字段均有缺省值，空文档即可得到可用配置；
//! - `initial_allowance` 缺省表示“不限额”，显式给出 `0` 表示在客户代码授予额度前不投递任何负载；
//! - `methods` 缺省表示 Front 不做本地方法名校验。

use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const MAXIMUM_TIMEOUT_MS: u64 = 300_000;

/// Front 与 Back 的运行配置。
///
/// # 教案式说明
/// - **意图 (Why)**：把协议中的“策略常量”外置，测试可以用极短超时、零额度等边界值驱动状态机；
/// - **契约 (What)**：`maximum_timeout_ms >= default_timeout_ms > 0`，由 [`validate`](Self::validate) 保证；
/// - **风险 (Trade-offs)**：超时以毫秒整数表示，牺牲亚毫秒精度换取配置文件的可读性。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndConfig {
    /// Back 收到未携带超时的发起票据时使用的超时。
    pub default_timeout_ms: u64,
    /// 任何超时都会被截断到该上限。
    pub maximum_timeout_ms: u64,
    /// 本端接收方向的初始额度，`None` 表示不限额。
    pub initial_allowance: Option<u64>,
    /// Front 允许调用的方法名，`None` 表示不校验。
    pub methods: Option<Vec<String>>,
}

impl Default for EndConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            maximum_timeout_ms: MAXIMUM_TIMEOUT_MS,
            initial_allowance: None,
            methods: None,
        }
    }
}

impl EndConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EndConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载并校验。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 校验字段间约束。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "default_timeout_ms must be positive".into(),
            ));
        }
        if self.maximum_timeout_ms < self.default_timeout_ms {
            return Err(ConfigError::Invalid(
                "maximum_timeout_ms must not be smaller than default_timeout_ms".into(),
            ));
        }
        if let Some(methods) = &self.methods
            && methods.iter().any(|name| name.is_empty())
        {
            return Err(ConfigError::Invalid("method names must not be empty".into()));
        }
        Ok(())
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = duration_to_millis(timeout);
        self
    }

    pub fn with_maximum_timeout(mut self, timeout: Duration) -> Self {
        self.maximum_timeout_ms = duration_to_millis(timeout);
        self
    }

    pub fn with_initial_allowance(mut self, allowance: Option<u64>) -> Self {
        self.initial_allowance = allowance;
        self
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn maximum_timeout(&self) -> Duration {
        Duration::from_millis(self.maximum_timeout_ms)
    }

    /// Front 侧的方法名校验。
    pub(crate) fn permits_method(&self, name: &str) -> bool {
        match &self.methods {
            Some(methods) => methods.iter().any(|known| known == name),
            None => true,
        }
    }
}

fn duration_to_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EndConfig::from_toml_str("").expect("empty toml parses");
        assert_eq!(config, EndConfig::default());
        assert!(config.permits_method("anything"));
    }

    #[test]
    fn parses_all_fields() {
        let config = EndConfig::from_toml_str(
            r#"
            default_timeout_ms = 1500
            maximum_timeout_ms = 6000
            initial_allowance = 0
            methods = ["echo", "sum"]
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.default_timeout(), Duration::from_millis(1500));
        assert_eq!(config.maximum_timeout(), Duration::from_secs(6));
        assert_eq!(config.initial_allowance, Some(0));
        assert!(config.permits_method("sum"));
        assert!(!config.permits_method("missing"));
    }

    #[test]
    fn rejects_inverted_timeouts_and_unknown_fields() {
        let inverted = EndConfig::from_toml_str(
            "default_timeout_ms = 10\nmaximum_timeout_ms = 5\n",
        );
        assert!(matches!(inverted, Err(ConfigError::Invalid(_))));

        let unknown = EndConfig::from_toml_str("retries = 3\n");
        assert!(matches!(unknown, Err(ConfigError::Parse(_))));
    }
}
