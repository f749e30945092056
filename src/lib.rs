pub mod audit;
pub mod config;
pub mod deliverable;
pub mod dispatch;
pub mod errors;
pub mod gates;
pub mod handoff;
pub mod init;
pub mod lock;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod rework;
pub mod stagehand_config;
pub mod ui;
pub mod util;
