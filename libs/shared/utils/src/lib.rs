pub mod extractor;
pub mod jwt;
pub mod locks;
pub mod retry;
pub mod test_utils;
pub mod time;

pub use locks::KeyedLocks;
pub use retry::RetryPolicy;
