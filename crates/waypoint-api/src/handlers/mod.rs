pub mod assets;
pub mod images;
pub mod uploads;
