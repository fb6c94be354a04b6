//! Readers that pull the metadata file out of a downloaded artifact without unpacking or
//! executing anything else.

mod sdist;
mod wheel;

pub use sdist::SDist;
pub use wheel::Wheel;
