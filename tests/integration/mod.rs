//! Integration tests for the Lectern generation pipeline

mod cache_store;
mod config_loading;
mod delivery_ordering;
mod pipeline_scenarios;
mod test_utils;
