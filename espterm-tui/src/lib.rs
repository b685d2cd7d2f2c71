//! Full-screen display for an espterm session: Bluetooth notifications on
//! the left, serial monitor output on the right, command input below.

pub mod app;
pub mod components;
pub mod model;
pub mod view;

pub use app::{TuiApp, restore_terminal};
pub use model::{ScreenModel, TuiDisplay, UiState};
pub use view::SessionSnapshot;
