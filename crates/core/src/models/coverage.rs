use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 单个文件的行覆盖数据：行号 -> 执行次数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    #[serde(default)]
    pub lines: BTreeMap<u32, u64>,
}

/// Slave提交的覆盖率报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    #[serde(default)]
    pub files: BTreeMap<String, FileCoverage>,
}

impl CoverageReport {
    /// 合并另一份报告，执行次数按行累加
    pub fn merge(&mut self, other: &CoverageReport) {
        for (path, coverage) in &other.files {
            let target = self.files.entry(path.clone()).or_default();
            for (line, hits) in &coverage.lines {
                *target.lines.entry(*line).or_insert(0) += hits;
            }
        }
    }

    /// (已覆盖行数, 总行数)
    pub fn line_totals(&self) -> (usize, usize) {
        self.files.values().fold((0, 0), |(covered, total), file| {
            let hit = file.lines.values().filter(|hits| **hits > 0).count();
            (covered + hit, total + file.lines.len())
        })
    }
}
