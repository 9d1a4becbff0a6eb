pub mod exporter;
pub mod normalizer;
pub mod parser;
pub mod session_store;
pub mod set_ops;
pub mod table;
pub mod upload;
