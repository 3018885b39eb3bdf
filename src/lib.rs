mod config;
pub mod engine;
mod form;
mod histogram;
mod params;
mod run;
pub mod scope;
mod tui;
mod updater;
mod writer;

pub use config::*;
pub use engine::AcquisitionEngine;
pub use form::*;
pub use histogram::*;
pub use params::*;
pub use run::*;
pub use scope::ScopeEngine;
pub use tui::*;
pub use updater::*;
pub use writer::*;
