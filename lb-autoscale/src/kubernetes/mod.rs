pub mod models;
pub mod updater;
