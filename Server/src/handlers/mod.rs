pub mod assets;
pub mod livesim;
pub mod time;
