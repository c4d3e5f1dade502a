pub mod common;
pub mod config_cmd;
pub mod fault;
pub mod list;
pub mod queue;
pub mod record;
pub mod sync;
