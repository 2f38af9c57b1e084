// Entity Models
// Couriers are a fixed enumeration: stable identity + canonical name + aliases

pub mod courier;

pub use courier::{Courier, ManualChoice, AMBIGUOUS_PAIR, FALLBACK_CODE, MANUAL_CHOICES};
