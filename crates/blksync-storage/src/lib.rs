//! blksync-storage: content-addressed block store over an OpenDAL operator

pub mod health;
pub mod operator;
pub mod store;

pub use health::check_health;
pub use operator::{build_fs_operator, prepare_dirs};
pub use store::{BlockError, BlockStore};
