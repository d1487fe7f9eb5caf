use serde::{Deserialize, Serialize};

use super::TaskId;

/// 测试树节点
///
/// 叶子节点（没有子节点）对应一个可执行的测试，活动初始化时会为每个
/// 浏览器需求展开成一个任务，并在 `task_id` 中记录对应的任务编号。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

impl TestNode {
    pub fn leaf(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn group(name: impl Into<String>, children: Vec<TestNode>) -> Self {
        Self {
            name: name.into(),
            children,
            ..Default::default()
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// 叶子节点数量
    pub fn leaf_count(&self) -> usize {
        if self.is_leaf() {
            1
        } else {
            self.children.iter().map(TestNode::leaf_count).sum()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_count() {
        let tree = TestNode::group(
            "root",
            vec![
                TestNode::leaf("a", "/a.html"),
                TestNode::group(
                    "nested",
                    vec![TestNode::leaf("b", "/b.html"), TestNode::leaf("c", "/c.html")],
                ),
            ],
        );
        assert_eq!(tree.leaf_count(), 3);
        assert!(!tree.is_leaf());
    }

    #[test]
    fn test_deserialize_minimal_node() {
        let node: TestNode = serde_json::from_str(r#"{"name":"x","url":"/x.html"}"#).unwrap();
        assert!(node.is_leaf());
        assert!(!node.ignored);
        assert_eq!(node.url.as_deref(), Some("/x.html"));
    }
}
