pub mod pending_changes;
pub mod preload;
