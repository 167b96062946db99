pub mod background;
pub mod bridge;
pub mod config;
pub mod contract;
pub mod favicon;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod overlay;
pub mod page_context;
pub mod phonetic;
pub mod runtime;
pub mod search;
pub mod settings;
pub mod snapshot;
pub mod sources;
pub mod storage;
pub mod transport;
