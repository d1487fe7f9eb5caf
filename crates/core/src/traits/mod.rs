pub mod test_type;

pub use test_type::{Instrumenter, TestType};
