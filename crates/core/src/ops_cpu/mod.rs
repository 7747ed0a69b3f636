pub mod conv;
pub mod matmul;
pub mod pool;
pub mod relu;
pub mod softmax;

pub use conv::*;
pub use matmul::*;
pub use pool::*;
pub use relu::*;
pub use softmax::*;
