pub mod add;
pub mod common;
pub mod edit;
pub mod list;
pub mod remove;
pub mod status;
pub mod sync;
