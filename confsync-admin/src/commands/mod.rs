//! Admin CLI command modules

pub mod edit;
pub mod history;
pub mod rollback;
pub mod show;

pub use edit::*;
pub use history::*;
pub use rollback::*;
pub use show::*;
