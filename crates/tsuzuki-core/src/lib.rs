pub mod config;
pub mod download;
pub mod error;
pub mod feed;
pub mod models;
pub mod normalize;
pub mod overrides;
pub mod pipeline;
pub mod relations;
pub mod resolver;
pub mod selector;
pub mod snapshot;
pub mod sources;
pub mod storage;
pub mod whitelist;
