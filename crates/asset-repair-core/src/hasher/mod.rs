pub mod digest;
pub mod pool;

pub use digest::{hash_data, hash_file, DigestKind};
pub use pool::{BufferPool, PooledBuffer};
