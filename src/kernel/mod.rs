//! Kernel evaluation contract and a few concrete kernels

pub mod combined;
pub mod linear;
pub mod precomputed;
pub mod rbf;
pub mod traits;
pub mod view;

pub use self::combined::*;
pub use self::linear::*;
pub use self::precomputed::*;
pub use self::rbf::*;
pub use self::traits::*;
pub use self::view::*;
