mod asset;
mod history;
mod ledger;
mod prescription;
mod transaction;

pub use asset::*;
pub use history::*;
pub use ledger::*;
pub use prescription::*;
pub use transaction::*;
