pub mod background;
pub mod frame;
pub mod grid_sampler;
pub mod normals;
pub mod point;
pub mod segmenter;
pub mod utils;
pub mod virtual_cube;
