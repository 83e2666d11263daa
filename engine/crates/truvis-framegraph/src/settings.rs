use std::path::Path;

use anyhow::Context;

/// Framegraph 运行参数，可以从 TOML 读取
///
/// ```toml
/// debug_labels = true
/// skip_redundant_barriers = false
/// log_execution_plan = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FgSettings {
    /// 每个 node 的命令外包一层 debug label
    pub debug_labels: bool,
    /// 省略没有任何 hazard 的只读 barrier
    pub skip_redundant_barriers: bool,
    /// 每次解析后打印执行计划
    pub log_execution_plan: bool,
}

impl Default for FgSettings {
    fn default() -> Self {
        Self {
            debug_labels: true,
            skip_redundant_barriers: false,
            log_execution_plan: false,
        }
    }
}

impl FgSettings {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("读取 framegraph 配置失败: {:?}", path))?;
        let settings =
            Self::from_toml_str(&content).with_context(|| format!("解析 framegraph 配置失败: {:?}", path))?;
        log::info!("framegraph settings loaded from {:?}: {:?}", path, settings);
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("序列化 framegraph 配置失败")
    }
}
