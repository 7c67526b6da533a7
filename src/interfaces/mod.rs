pub mod feed_transport;
pub mod reading_store;
