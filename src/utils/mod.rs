// Re-export all utility modules
pub mod display;
pub mod logging;

// Re-export commonly used items for convenience
pub use display::{Console, MemoryConsole, Style, TerminalConsole};
