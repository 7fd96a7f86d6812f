//! Typed option and payload values.
//!
//! Raw JSON is validated into these types once; the rest of the core works
//! with the typed shapes only.

pub mod attribute;
pub mod object;
pub mod value;

pub use attribute::{
    AttributeOptions, AttributePayload, AttributeValue, AutoDestination, AutoOption, AutoScope,
    AUTO_OPTION_KEY,
};
pub use object::{ChildPlacement, ObjectOptions, VisibleType};
pub use value::OptionValue;
