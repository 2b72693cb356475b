pub mod engine;
pub mod item;
pub mod materialize;
pub mod paths;
pub mod reconcile;
pub mod scan;
pub mod tags;
pub mod thumbnail;
