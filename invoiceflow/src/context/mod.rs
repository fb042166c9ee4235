//! Run state and stage invocation context.

mod stage;
mod state_bag;

pub use stage::{StageContext, StageServices};
pub use state_bag::{StateBag, INVOICE_KEY};
