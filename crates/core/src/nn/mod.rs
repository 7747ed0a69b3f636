pub mod classifier;
pub mod init;
pub mod layers;
pub mod loss;
pub mod model_conv;
pub mod model_dense;
pub mod optim;
pub mod shape;

pub use classifier::*;
pub use init::Init;
pub use layers::*;
pub use loss::*;
pub use model_conv::*;
pub use model_dense::*;
pub use optim::*;
