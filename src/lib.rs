pub mod catalog;
pub mod config;
pub mod error;
pub mod explorer;
pub mod form;
pub mod http;
pub mod resource;
pub mod runner;
pub mod schema;
pub mod spec;
pub mod store;
pub mod table;
