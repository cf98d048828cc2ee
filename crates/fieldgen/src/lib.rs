pub mod binary;
pub mod bounds;
pub mod c_emit;
pub mod crandall;
pub mod diagnostics;
pub mod generate;
#[doc(hidden)]
pub mod interp;
pub mod ir;
pub mod language;
pub mod mersenne;
pub mod model;
pub mod precompute;
pub mod protocol;
