// tilestat: GPU image statistics over tiled two-pass reductions
//
// Sum, mean and population covariance of 4-channel images computed with
// wgpu compute shaders, plus the sequential CPU oracle used to validate them.

pub mod convert;
pub mod gpu;
pub mod image;
pub mod math;
pub mod reference;
