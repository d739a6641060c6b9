//! 调度引擎与外部协作方之间的端口

pub mod fire_handler;
pub mod linear_source;

pub use fire_handler::FireHandler;
pub use linear_source::{IssuePage, IssuePageRequest, LinearIssue, LinearSource};
