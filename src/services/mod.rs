//! 服务层模块
//!
//! 包含核心业务逻辑：集群客户端、部署判定、下线和部署编排

pub mod deploy;
pub mod fleet;
pub mod resolver;
pub mod teardown;

pub use deploy::{DeployServices, DeploymentOutcome};
pub use fleet::Fleet;
