//! Safe SQL builder: identifiers from the catalog only, values as parameters.

mod builder;
mod columns;
mod decode;
pub mod params;
pub use builder::*;
pub use columns::*;
pub use decode::*;
pub use params::*;
