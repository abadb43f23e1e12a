mod state;

pub use state::{AppState, LiveCache};
