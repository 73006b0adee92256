pub mod api;
pub mod circuit;
pub mod error;
pub mod fe;
pub mod note;
pub mod poseidon;
pub mod wire;
pub mod zeros;

pub use circuit::CircuitKind;
pub use error::{CoreError, Result};
pub use fe::{FeBe, FeLe, Fr};
pub use wire::Groth16Proof;
