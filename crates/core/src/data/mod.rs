pub mod loader;
pub mod mnist;
pub mod synthetic;

pub use loader::{Batch, DataLoader, InMemoryLoader};
pub use mnist::{MnistDataset, Split};
pub use synthetic::ClassBlobs;
