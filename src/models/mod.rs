mod commission;
mod membership;
mod payment_intent;
mod plan;

pub use commission::*;
pub use membership::*;
pub use payment_intent::*;
pub use plan::*;
