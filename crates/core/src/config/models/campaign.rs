use serde::{Deserialize, Serialize};

use crate::models::{BrowserFilter, TestNode};

/// 测试活动配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// 测试类型: "static" 或 "files"
    pub test_type: String,
    /// static 类型使用的测试列表
    #[serde(default)]
    pub tests: Vec<TestNode>,
    /// files 类型扫描的根目录
    #[serde(default)]
    pub root_dir: Option<String>,
    /// files 类型识别为测试的文件扩展名
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// files 类型生成测试URL时使用的前缀
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
    /// 浏览器需求列表，为空时任意Slave均可执行
    #[serde(default)]
    pub browsers: Vec<BrowserFilter>,
    #[serde(default)]
    pub coverage: CoverageConfig,
    /// 出现错误时仍视为成功
    #[serde(default)]
    pub ignore_errors: bool,
    /// 出现断言失败时仍视为成功
    #[serde(default)]
    pub ignore_failures: bool,
}

/// 覆盖率配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageConfig {
    pub enabled: bool,
    /// 需要插桩的文件（相对 root_dir）
    #[serde(default)]
    pub files: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["html".to_string()]
}

fn default_url_prefix() -> String {
    "/".to_string()
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            test_type: "static".to_string(),
            tests: Vec::new(),
            root_dir: None,
            extensions: default_extensions(),
            url_prefix: default_url_prefix(),
            browsers: Vec::new(),
            coverage: CoverageConfig::default(),
            ignore_errors: false,
            ignore_failures: false,
        }
    }
}

impl CampaignConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_types = ["static", "files"];
        if !valid_types.contains(&self.test_type.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的测试类型: {}，支持的类型: {:?}",
                self.test_type,
                valid_types
            ));
        }

        if self.test_type == "files" && self.root_dir.is_none() {
            return Err(anyhow::anyhow!("files 测试类型必须配置 root_dir"));
        }

        if self.extensions.iter().any(|ext| ext.is_empty()) {
            return Err(anyhow::anyhow!("文件扩展名不能为空"));
        }

        Ok(())
    }
}
