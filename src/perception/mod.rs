pub mod annotator;
pub mod coords;
pub mod focus_crop;
pub mod imaging;
pub mod screenshot;
pub mod types;
