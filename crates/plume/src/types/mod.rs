//! Built-in value types.

pub mod bytes;
pub mod class;
pub mod dict;
pub mod function;
pub mod generator;
pub mod iter;
pub mod list;
pub mod long_int;
pub mod promise;
pub mod slice;

pub use bytes::Bytes;
pub use class::{ClassObject, Iife, Instance, Method, linearize};
pub use dict::Dict;
pub use function::{Function, NativeClosure};
pub use generator::Generator;
pub use iter::Iter;
pub use list::List;
pub use long_int::LongInt;
pub use promise::{Promise, PromiseState, Registration};
pub use slice::Slice;
