pub mod gaussian_3d;
pub mod surface;
pub mod view;

pub use view::View;
