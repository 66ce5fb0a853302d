// Application layer - use cases and orchestration over an injected ledger.
// Issuance and fills write to the ledger; history and holdings only read from it.
// None of the four use cases depend on each other.

pub mod error;
mod fill;
mod history;
mod holdings;
mod integrity;
mod issuance;
mod service;

pub use error::*;
pub use fill::*;
pub use history::*;
pub use holdings::*;
pub use integrity::*;
pub use issuance::*;
pub use service::*;
