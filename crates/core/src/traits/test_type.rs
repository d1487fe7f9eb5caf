use async_trait::async_trait;

use crate::models::TestNode;
use crate::SchedulerResult;

/// 测试类型接口
///
/// 每种测试类型负责根据自身配置异步枚举出测试树，调度核心只消费树的结构，
/// 不关心测试是如何被发现的。
#[async_trait]
pub trait TestType: Send + Sync {
    /// 配置中使用的类型名称
    fn name(&self) -> &str;

    /// 枚举测试，返回测试树的根节点列表
    async fn enumerate(&self) -> SchedulerResult<Vec<TestNode>>;
}

/// 代码覆盖率插桩接口
///
/// 启用覆盖率时，活动初始化需要同时等待测试枚举和插桩完成。
#[async_trait]
pub trait Instrumenter: Send + Sync {
    /// 对所有需要统计覆盖率的文件进行插桩，返回处理的文件数
    async fn instrument(&self) -> SchedulerResult<usize>;
}
