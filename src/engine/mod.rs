pub mod advisory;
pub mod colony;
pub mod combat;
pub mod galaxy;
pub mod trading;
