#![forbid(unsafe_code)]

pub type Unit = euclid::UnknownUnit;

/// Measured box dimensions in integer pixels. Equality is exact, component-wise;
/// sizes are replaced wholesale, never mutated field by field.
pub type Size = euclid::Size2D<u32, Unit>;

pub fn size(width: u32, height: u32) -> Size {
    euclid::size2(width, height)
}
