//! Comment commands.

pub mod parser;
pub mod types;

pub use parser::{
    is_explicit_test, is_ok_to_test, is_retest, is_test_all, override_contexts, parse_commands,
};
pub use types::Command;
