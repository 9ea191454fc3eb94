pub mod bridge;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod event_bus;
pub mod executor;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

pub use bridge::{
    RenderingSurface, ScriptCompletion, SurfaceCallbacks, SurfaceNotification, SwipeDirection,
    TapRegion,
};
pub use config::{load_settings, load_settings_from, EngineSettings};
pub use controller::ReaderController;
pub use dispatch::{Dispatcher, InteractionThread};
pub use event_bus::{EventBus, EventSubscription};
pub use executor::LongRunningCommand;
