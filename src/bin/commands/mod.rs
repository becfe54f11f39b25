pub mod compact_cmd;
pub mod inspect_cmd;
pub mod query_cmd;

pub use compact_cmd::{cmd_compact, CompactArgs};
pub use inspect_cmd::cmd_inspect;
pub use query_cmd::cmd_query;
