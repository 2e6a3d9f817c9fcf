//! Concrete [`Backend`](crate::Backend) implementations.

pub mod async_backend;
pub mod eager;

pub use async_backend::AsyncBackend;
pub use eager::EagerBackend;
