pub mod dice;
pub mod models;
pub mod notifier;
pub mod registry;
pub mod settings;
