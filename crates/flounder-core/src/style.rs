use serde::{Deserialize, Serialize};

/// An inline length. Percentages resolve against the containing box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Px(u32),
    Percent(u32),
}

/// An ordered font fallback stack plus the size it is rendered at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontSpec {
    pub families: Vec<String>,
    pub size_px: u32,
}

impl FontSpec {
    pub fn new(families: impl IntoIterator<Item = impl Into<String>>, size_px: u32) -> Self {
        Self {
            families: families.into_iter().map(Into::into).collect(),
            size_px,
        }
    }
}

/// A partial inline-style update. Unset fields leave the element's current
/// style untouched, mirroring how inline style properties are assigned
/// individually on a real surface.
#[derive(Debug, Clone, Default)]
pub struct StylePatch {
    pub absolute: Option<bool>,
    pub offset_left: Option<i32>,
    pub offset_top: Option<i32>,
    pub width: Option<Length>,
    pub height: Option<Length>,
    pub clip_overflow: Option<bool>,
    pub font: Option<FontSpec>,
    pub nowrap: Option<bool>,
    pub hidden: Option<bool>,
}
