//! Linear导入流水线
//!
//! 运行器按 `created_at` 顺序领取导入任务, 每次领取只执行一个有界的步骤:
//! 拉取一页外部工作项、映射并写入本地记录, 然后保存检查点并释放锁。
//! 步骤可重放, 崩溃后的任务在租约过期后由任意实例从检查点继续。

pub mod linear_client;
pub mod mapper;
pub mod retry_policy;
pub mod runner;
pub mod step;

pub use linear_client::LinearGraphqlClient;
pub use mapper::{map_state, parse_due_date, IssueDecision, IssueMapper, MismatchDraft};
pub use retry_policy::RetryPolicy;
pub use runner::{ImportPipelineRunner, RunnerReport, RunnerSettings};
pub use step::{ImportStep, StepContext, StepOutcome};
