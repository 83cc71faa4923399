//! Core module - Instance configuration, launching, log watching and reconciliation

pub mod heartbeat;
mod instance;
pub mod launcher;
pub mod monitor;
pub mod process;
pub mod reconciler;
pub mod settings;
pub mod watcher;

pub use launcher::GameLauncher;
pub use monitor::ResourceMonitor;
pub use reconciler::Reconciler;
pub use settings::Settings;
pub use watcher::MarkerTrigger;
