pub mod progress;

pub use progress::Bar;
