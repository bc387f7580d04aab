pub mod settings;

pub use settings::{resolve_data_dir, Settings, SyncSettings};
