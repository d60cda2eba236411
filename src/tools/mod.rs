//! 工具层：线协议、进程启动器、监管器、分发器、服务端与分形 Agent 工具

pub mod agent;
pub mod echo;
pub mod executor;
pub mod launcher;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod supervisor;

pub use agent::{AgentRecipe, AgentToolHandler, DEFAULT_AGENT_TOOL_NAME};
pub use echo::EchoHandler;
pub use executor::{DispatchPolicy, ToolCallResult, ToolDispatcher};
pub use launcher::{CommandLauncher, InProcessLauncher, KillHandle, ProcessLauncher, ToolChannel, ToolSource};
pub use protocol::{ToolSpec, RECURSION_LIMIT_KIND};
pub use schema::{argument_schema, AgentToolArgs};
pub use server::{serve, serve_stdio, ToolHandler};
pub use supervisor::{CallContext, LaunchReport, ToolDescriptor, ToolProcessHandle, ToolSupervisor};
