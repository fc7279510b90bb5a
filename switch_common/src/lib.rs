mod amount;

pub mod helpers;
pub mod op;
mod secret;

pub use amount::{Amount, AmountConversionError, AMOUNT_SCALE};
pub use secret::Secret;
