// Core modules implementing the store memory model, the text codec, and error modeling.
pub mod datum;
pub mod equal;
pub mod error;
pub mod handle;
pub mod printer;
pub mod reader;
pub mod store;
