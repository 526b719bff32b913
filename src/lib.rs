//! A small HTTP service that tells cats from dogs. Uploaded images are
//! preprocessed, classified by a pre-trained TorchScript model, and every
//! classification is logged as a run in a local tracking store.

pub mod classifier;
pub mod config;
pub mod preprocess;
pub mod server;
pub mod service;
pub mod torch;
pub mod tracking;
