pub mod catalog;
pub mod condition;
pub mod deployment;
pub mod discovery;
pub mod kagent;

pub use catalog::*;
pub use condition::{find_condition, set_condition, Condition};
pub use deployment::*;
pub use discovery::*;
pub use kagent::{Agent, MCPServer, ModelConfig, RemoteMCPServer, RuntimeKind};
