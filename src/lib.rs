#![warn(unused_extern_crates)]

pub mod analyzer;
pub mod cadence;
pub mod camera;
pub mod capture;
pub mod error;
pub mod events;
pub mod face;
pub mod normalize;
pub mod pipeline;
pub mod settings;
pub mod shapes;
pub mod tracker;
