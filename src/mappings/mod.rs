pub mod keysym_to_key;
pub mod property_names;

pub use keysym_to_key::KeysymToKey;
pub use property_names::{PropertyNames, PropertyValue, WindowProperty};
