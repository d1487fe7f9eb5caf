//! Slave能力检测
//!
//! 将握手信息中的 user agent 解析为 [`CapabilityDescriptor`]，
//! 握手中显式提供的字段（浏览器名称、版本、操作系统、IE文档模式）优先于解析结果。

use crate::models::{CapabilityDescriptor, SlaveHandshake};

/// 根据握手信息生成能力描述
pub fn detect(handshake: &SlaveHandshake) -> CapabilityDescriptor {
    let mut descriptor = parse_user_agent(&handshake.user_agent);

    if let Some(name) = &handshake.browser_name {
        descriptor.browser_name = name.clone();
    }
    if let Some(version) = &handshake.browser_version {
        let (major, minor) = parse_version(version);
        descriptor.major_version = major;
        descriptor.minor_version = minor;
    }
    if let Some(os) = &handshake.os {
        descriptor.os_name = os.clone();
    }
    if let Some(mode) = handshake.document_mode {
        if descriptor.browser_name == "IE" {
            descriptor.major_version = Some(mode);
            descriptor.minor_version = Some(0);
        }
    }

    descriptor
}

/// 解析 user agent 字符串
pub fn parse_user_agent(user_agent: &str) -> CapabilityDescriptor {
    let (browser_name, (major_version, minor_version)) = detect_browser(user_agent);
    let (os_name, os_version, mobile_os) = detect_os(user_agent);

    CapabilityDescriptor {
        browser_name: browser_name.to_string(),
        major_version,
        minor_version,
        os_name: os_name.to_string(),
        os_version,
        mobile: mobile_os || user_agent.contains("Mobile"),
        user_agent: user_agent.to_string(),
    }
}

type Version = (Option<u32>, Option<u32>);

fn detect_browser(ua: &str) -> (&'static str, Version) {
    // 顺序很重要：Edge/Opera 的 UA 中同样包含 Chrome 和 Safari
    const TOKENS: [(&str, &str); 9] = [
        ("Edg/", "Edge"),
        ("Edge/", "Edge"),
        ("OPR/", "Opera"),
        ("PhantomJS/", "PhantomJS"),
        ("HeadlessChrome/", "Chrome"),
        ("CriOS/", "Chrome"),
        ("Chrome/", "Chrome"),
        ("FxiOS/", "Firefox"),
        ("Firefox/", "Firefox"),
    ];

    for (token, name) in TOKENS {
        if let Some(version) = version_after(ua, token) {
            return (name, version);
        }
    }

    if let Some(version) = version_after(ua, "MSIE ") {
        return ("IE", version);
    }
    if ua.contains("Trident/") {
        if let Some(version) = version_after(ua, "rv:") {
            return ("IE", version);
        }
    }
    if ua.contains("Safari/") {
        if let Some(version) = version_after(ua, "Version/") {
            return ("Safari", version);
        }
    }
    if let Some(version) = version_after(ua, "Opera/") {
        return ("Opera", version);
    }

    ("Other", (None, None))
}

fn detect_os(ua: &str) -> (&'static str, Option<String>, bool) {
    if ua.contains("Windows Phone") {
        return ("Windows Phone", raw_version_after(ua, "Windows Phone "), true);
    }
    if ua.contains("Windows") {
        return ("Windows", raw_version_after(ua, "Windows NT "), false);
    }
    if ua.contains("Android") {
        return ("Android", raw_version_after(ua, "Android "), true);
    }
    if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        let version = raw_version_after(ua, "OS ").map(|v| v.replace('_', "."));
        return ("iOS", version, true);
    }
    if ua.contains("CrOS") {
        return ("Chrome OS", None, false);
    }
    if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        let version = raw_version_after(ua, "Mac OS X ").map(|v| v.replace('_', "."));
        return ("Mac OS", version, false);
    }
    if ua.contains("Linux") || ua.contains("X11") {
        return ("Linux", None, false);
    }
    ("Other", None, false)
}

fn raw_version_after(ua: &str, token: &str) -> Option<String> {
    let start = ua.find(token)? + token.len();
    let version: String = ua[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '_')
        .collect();
    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}

fn version_after(ua: &str, token: &str) -> Option<Version> {
    raw_version_after(ua, token).map(|raw| parse_version(&raw))
}

fn parse_version(raw: &str) -> Version {
    let mut parts = raw.split(['.', '_']).map(|part| part.parse::<u32>().ok());
    let major = parts.next().flatten();
    let minor = parts.next().flatten();
    (major, minor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIREFOX_LINUX: &str =
        "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:39.0) Gecko/20100101 Firefox/39.0";
    const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/45.0.2454.85 Safari/537.36";
    const EDGE: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";
    const IE11: &str = "Mozilla/5.0 (Windows NT 6.1; WOW64; Trident/7.0; rv:11.0) like Gecko";
    const IE9: &str = "Mozilla/5.0 (compatible; MSIE 9.0; Windows NT 6.1; Trident/5.0)";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 9_1 like Mac OS X) AppleWebKit/601.1.46 (KHTML, like Gecko) Version/9.0 Mobile/13B143 Safari/601.1";
    const PHANTOM: &str = "Mozilla/5.0 (Unknown; Linux x86_64) AppleWebKit/538.1 (KHTML, like Gecko) PhantomJS/2.1.1 Safari/538.1";

    #[test]
    fn test_firefox_on_linux() {
        let d = parse_user_agent(FIREFOX_LINUX);
        assert_eq!(d.browser_name, "Firefox");
        assert_eq!(d.major_version, Some(39));
        assert_eq!(d.minor_version, Some(0));
        assert_eq!(d.os_name, "Linux");
        assert!(!d.mobile);
    }

    #[test]
    fn test_chromium_family() {
        let chrome = parse_user_agent(CHROME_WINDOWS);
        assert_eq!(chrome.browser_name, "Chrome");
        assert_eq!(chrome.major_version, Some(45));
        assert_eq!(chrome.os_name, "Windows");
        assert_eq!(chrome.os_version.as_deref(), Some("10.0"));

        let edge = parse_user_agent(EDGE);
        assert_eq!(edge.browser_name, "Edge");
        assert_eq!(edge.major_version, Some(120));

        let phantom = parse_user_agent(PHANTOM);
        assert_eq!(phantom.browser_name, "PhantomJS");
        assert_eq!(phantom.major_version, Some(2));
        assert_eq!(phantom.minor_version, Some(1));
    }

    #[test]
    fn test_internet_explorer() {
        let ie11 = parse_user_agent(IE11);
        assert_eq!(ie11.browser_name, "IE");
        assert_eq!(ie11.major_version, Some(11));

        let ie9 = parse_user_agent(IE9);
        assert_eq!(ie9.browser_name, "IE");
        assert_eq!(ie9.major_version, Some(9));
    }

    #[test]
    fn test_mobile_safari() {
        let d = parse_user_agent(SAFARI_IPHONE);
        assert_eq!(d.browser_name, "Safari");
        assert_eq!(d.major_version, Some(9));
        assert_eq!(d.os_name, "iOS");
        assert_eq!(d.os_version.as_deref(), Some("9.1"));
        assert!(d.mobile);
    }

    #[test]
    fn test_handshake_overrides() {
        let handshake = SlaveHandshake {
            user_agent: IE11.to_string(),
            document_mode: Some(8),
            ..Default::default()
        };
        let d = detect(&handshake);
        assert_eq!(d.major_version, Some(8));

        let handshake = SlaveHandshake {
            user_agent: "custom-runner".to_string(),
            browser_name: Some("Firefox".to_string()),
            browser_version: Some("40.1".to_string()),
            os: Some("Linux".to_string()),
            ..Default::default()
        };
        let d = detect(&handshake);
        assert_eq!(d.browser_name, "Firefox");
        assert_eq!(d.major_version, Some(40));
        assert_eq!(d.minor_version, Some(1));
        assert_eq!(d.os_name, "Linux");
    }
}
