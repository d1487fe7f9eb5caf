//! 配置管理
//!
//! 配置按以下顺序加载，后者覆盖前者：
//!
//! 1. 内置默认值
//! 2. TOML 配置文件
//! 3. 以 `TESTFARM_` 为前缀的环境变量（嵌套字段使用 `__` 分隔，
//!    例如 `TESTFARM_SCHEDULER__TASK_TIMEOUT_MS=60000`）

pub mod models;

#[cfg(test)]
mod tests;

pub use models::*;
