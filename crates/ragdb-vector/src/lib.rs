//! Vector index adapters: an exact in-process index and, with the `lance`
//! feature, a LanceDB table.
pub mod flat;

#[cfg(feature = "lance")]
pub mod lance;
#[cfg(feature = "lance")]
pub mod schema;

pub use flat::FlatVectorIndex;

#[cfg(feature = "lance")]
pub use lance::LanceVectorIndex;
