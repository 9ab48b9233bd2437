//! picpool - parallel image compression over a pool of isolated worker processes.
//!
//! The [`pool`] module runs codec jobs in `picpool worker` processes and
//! survives their crashes. [`bridge::Compressor`] batches files on top of it.
//! Each worker routes its jobs through [`codec::CodecRouter`].

pub mod bridge;
pub mod codec;
pub mod error;
pub mod events;
pub mod files;
pub mod logging;
pub mod output;
pub mod pool;
pub mod settings;
pub mod theme;

pub use bridge::{BatchCallbacks, CompressionResult, CompressionStatus, Compressor};
pub use error::{PoolError, Result};
pub use pool::{PoolConfig, WorkerPool};
