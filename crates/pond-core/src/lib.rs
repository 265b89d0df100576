pub mod chunk;
pub mod error;
pub mod home;
pub mod opcodes;
pub mod value;

pub use chunk::{Chunk, Function, MAX_LITERALS};
pub use error::{Diagnostic, Diagnostics, ErrorLocation, PondError};
pub use lasso::Spur;
pub use opcodes::{op, Op};
pub use value::{intern, resolve, with_resolved, Closure, TypeTag, UpvalueCell, Value};
