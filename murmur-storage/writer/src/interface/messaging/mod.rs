pub mod consumer;

pub use consumer::StorageWriterConsumer;
