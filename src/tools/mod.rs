pub mod builtin;
pub mod discovery;
pub mod dispatcher;
pub mod function;
pub mod mcp;
pub mod registry;
pub mod schema;

pub use builtin::{builtin_tools, EchoTool};
pub use discovery::{StaticDiscovery, ToolDiscovery};
pub use dispatcher::ToolDispatcher;
pub use function::{BlockingFnTool, FnTool};
pub use mcp::{McpConnection, McpDiscovery, McpTool};
pub use registry::{CallLane, Tool, ToolLookupError, ToolRegistry, ToolSpec};
pub use schema::parameters_schema_for;
