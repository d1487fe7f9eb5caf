use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use testfarm_core::{
    models::TestNode, CampaignConfig, SchedulerError, SchedulerResult, TestType,
};

/// 配置中直接列出的测试
pub struct StaticTestType {
    tests: Vec<TestNode>,
}

impl StaticTestType {
    pub fn new(tests: Vec<TestNode>) -> Self {
        Self { tests }
    }
}

#[async_trait]
impl TestType for StaticTestType {
    fn name(&self) -> &str {
        "static"
    }

    async fn enumerate(&self) -> SchedulerResult<Vec<TestNode>> {
        Ok(self.tests.clone())
    }
}

/// 扫描目录得到的测试
///
/// 每个子目录对应一个分组，扩展名匹配的文件对应一个测试，测试URL为
/// `url_prefix` 加上相对根目录的路径。同级节点按名称排序。
pub struct FileTestType {
    root_dir: PathBuf,
    extensions: Vec<String>,
    url_prefix: String,
}

impl FileTestType {
    pub fn new(
        root_dir: impl Into<PathBuf>,
        extensions: Vec<String>,
        url_prefix: impl Into<String>,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            extensions,
            url_prefix: url_prefix.into(),
        }
    }

    fn is_test_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.extensions
                    .iter()
                    .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    fn url_for(&self, relative: &Path) -> String {
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if self.url_prefix.ends_with('/') {
            format!("{}{}", self.url_prefix, relative)
        } else {
            format!("{}/{}", self.url_prefix, relative)
        }
    }

    fn scan<'a>(&'a self, dir: PathBuf) -> BoxFuture<'a, SchedulerResult<Vec<TestNode>>> {
        Box::pin(async move {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
                SchedulerError::TestEnumeration(format!("读取目录 {} 失败: {}", dir.display(), e))
            })?;

            let mut paths = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                paths.push((entry.path(), entry.file_type().await?.is_dir()));
            }
            paths.sort();

            let mut nodes = Vec::new();
            for (path, is_dir) in paths {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if is_dir {
                    let children = self.scan(path).await?;
                    if !children.is_empty() {
                        nodes.push(TestNode::group(name, children));
                    }
                } else if self.is_test_file(&path) {
                    let relative = path.strip_prefix(&self.root_dir).unwrap_or(&path);
                    nodes.push(TestNode::leaf(name, self.url_for(relative)));
                }
            }
            Ok(nodes)
        })
    }
}

#[async_trait]
impl TestType for FileTestType {
    fn name(&self) -> &str {
        "files"
    }

    async fn enumerate(&self) -> SchedulerResult<Vec<TestNode>> {
        let tree = self.scan(self.root_dir.clone()).await?;
        debug!(
            "在 {} 中找到 {} 个测试",
            self.root_dir.display(),
            tree.iter().map(TestNode::leaf_count).sum::<usize>()
        );
        Ok(tree)
    }
}

/// 根据活动配置创建测试类型
pub fn create_test_type(config: &CampaignConfig) -> SchedulerResult<Arc<dyn TestType>> {
    match config.test_type.as_str() {
        "static" => Ok(Arc::new(StaticTestType::new(config.tests.clone()))),
        "files" => {
            let root_dir = config.root_dir.as_ref().ok_or_else(|| {
                SchedulerError::Configuration("files 测试类型必须配置 root_dir".to_string())
            })?;
            Ok(Arc::new(FileTestType::new(
                root_dir,
                config.extensions.clone(),
                config.url_prefix.clone(),
            )))
        }
        other => Err(SchedulerError::Configuration(format!(
            "不支持的测试类型: {other}"
        ))),
    }
}
