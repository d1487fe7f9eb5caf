use serde::{Deserialize, Serialize};

/// 浏览器能力描述
///
/// 由Slave握手时上报的 user agent（以及可选的覆盖字段）解析得到，
/// 连接期间保持不变，用于与浏览器需求进行匹配。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub browser_name: String,
    pub major_version: Option<u32>,
    pub minor_version: Option<u32>,
    pub os_name: String,
    pub os_version: Option<String>,
    pub mobile: bool,
    pub user_agent: String,
}

impl CapabilityDescriptor {
    /// 形如 "Firefox 39.0 (Linux)" 的显示名称
    pub fn display_name(&self) -> String {
        let version = match (self.major_version, self.minor_version) {
            (Some(major), Some(minor)) => format!(" {major}.{minor}"),
            (Some(major), None) => format!(" {major}"),
            _ => String::new(),
        };
        format!("{}{} ({})", self.browser_name, version, self.os_name)
    }
}

/// 浏览器需求过滤条件
///
/// 所有字段都是可选的，缺失表示"不关心"。`os` 除了具体的操作系统名称外，
/// 还支持以下聚合名称：
///
/// - `Desktop Linux` / `Desktop Windows` / `Desktop MacOS`: 对应系统的桌面浏览器
/// - `Mobile`: 任意移动设备
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserFilter {
    /// 显示名称，不参与匹配
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub browser_name: Option<String>,
    #[serde(default)]
    pub major_version: Option<u32>,
    #[serde(default)]
    pub minor_version: Option<u32>,
    #[serde(default)]
    pub os: Option<String>,
}

impl BrowserFilter {
    /// 不限制任何条件的需求
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.browser_name.is_none()
            && self.major_version.is_none()
            && self.minor_version.is_none()
            && self.os.is_none()
    }

    /// 检查能力描述是否满足该需求
    pub fn matches(&self, descriptor: &CapabilityDescriptor) -> bool {
        if let Some(name) = &self.browser_name {
            if !name.eq_ignore_ascii_case(&descriptor.browser_name) {
                return false;
            }
        }
        if let Some(major) = self.major_version {
            if descriptor.major_version != Some(major) {
                return false;
            }
        }
        if let Some(minor) = self.minor_version {
            if descriptor.minor_version != Some(minor) {
                return false;
            }
        }
        if let Some(os) = &self.os {
            if !os_matches(os, descriptor) {
                return false;
            }
        }
        true
    }

    /// 需求的显示标签
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if self.is_unrestricted() {
            return "default".to_string();
        }

        let mut parts = Vec::new();
        if let Some(browser) = &self.browser_name {
            parts.push(browser.clone());
        }
        match (self.major_version, self.minor_version) {
            (Some(major), Some(minor)) => parts.push(format!("{major}.{minor}")),
            (Some(major), None) => parts.push(major.to_string()),
            _ => {}
        }
        if let Some(os) = &self.os {
            parts.push(format!("({os})"));
        }
        parts.join(" ")
    }
}

fn os_matches(filter: &str, descriptor: &CapabilityDescriptor) -> bool {
    let desktop = |os: &str| !descriptor.mobile && descriptor.os_name.eq_ignore_ascii_case(os);

    match filter.to_ascii_lowercase().as_str() {
        "desktop linux" => desktop("Linux"),
        "desktop windows" => desktop("Windows"),
        "desktop macos" => desktop("Mac OS"),
        "mobile" => descriptor.mobile,
        _ => filter.eq_ignore_ascii_case(&descriptor.os_name),
    }
}
