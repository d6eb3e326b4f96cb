pub mod cli;
pub mod lua_host;
pub mod render_bridge;
pub mod runtime;
pub mod scheduler;
