pub mod core;
pub mod entries;
pub mod feedback;
pub mod groups;
pub mod notes;
pub mod overrides;
pub mod settings;
pub mod structure;
pub mod thresholds;
