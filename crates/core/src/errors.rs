use thiserror::Error;
use uuid::Uuid;

/// 调度引擎错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移错误: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("定时事件未找到: {id}")]
    ScheduledEventNotFound { id: Uuid },

    #[error("定时事件已处理, 无法修改: {id}")]
    ScheduledEventAlreadyProcessed { id: Uuid },

    #[error("定时事件正在触发, 请在租约结束后重试: {id}")]
    ScheduledEventClaimed { id: Uuid },

    #[error("导入任务未找到: {id}")]
    ImportJobNotFound { id: Uuid },

    #[error("Linear连接未找到: {id}")]
    ConnectionNotFound { id: i64 },

    #[error("Linear连接不可用: {id} (状态: {status})")]
    ConnectionInactive { id: i64, status: String },

    #[error("锁已丢失: {record} {id}")]
    LockLost { record: &'static str, id: Uuid },

    #[error("外部系统暂时不可用: {0}")]
    ExternalTransient(String),

    #[error("外部系统拒绝请求: {0}")]
    ExternalRejected(String),

    #[error("执行超时")]
    ExecutionTimeout,

    #[error("触发处理器错误: {0}")]
    FireHandler(String),

    #[error("无效的导入参数: {0}")]
    InvalidImportParams(String),

    #[error("无效的导入进度: {0}")]
    InvalidCheckpoint(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 可自动重试的错误: 网络/外部API故障、超时、锁竞争以及数据库的瞬时故障
    pub fn is_transient(&self) -> bool {
        match self {
            SchedulerError::ExternalTransient(_)
            | SchedulerError::ExecutionTimeout
            | SchedulerError::FireHandler(_) => true,
            SchedulerError::Database(sqlx::Error::Database(db_err)) => db_err
                .code()
                .is_some_and(|code| is_lock_contention_code(&code)),
            SchedulerError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Protocol(_)
            ),
            _ => false,
        }
    }

    pub fn is_lost_lock(&self) -> bool {
        matches!(self, SchedulerError::LockLost { .. })
    }

    pub fn lock_lost(record: &'static str, id: Uuid) -> Self {
        SchedulerError::LockLost { record, id }
    }
}

/// 锁竞争类的数据库错误码
///
/// PostgreSQL: 40001 序列化失败, 40P01 死锁, 55P03 加锁失败。
/// SQLite 返回扩展错误码, 低8位为主错误码: 5 BUSY, 6 LOCKED。
fn is_lock_contention_code(code: &str) -> bool {
    match code {
        "40001" | "40P01" | "55P03" => true,
        // SQLSTATE 固定5位, SQLite扩展码不超过4位
        _ if code.len() >= 5 => false,
        _ => code
            .parse::<i32>()
            .is_ok_and(|primary| matches!(primary & 0xff, 5 | 6)),
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
