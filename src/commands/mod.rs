//! Command implementations for the dct CLI
//!
//! - **upgrade**: the upgrade run itself
//! - **list**: installed and outdated packages
//! - **query**: dependency order
//! - **linking**: pin and unpin

pub mod linking;
pub mod list;
pub mod query;
pub mod upgrade;

pub use linking::{pin, unpin};
pub use list::{list, outdated};
pub use query::deps;
pub use upgrade::upgrade;
