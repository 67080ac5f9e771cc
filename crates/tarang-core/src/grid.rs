//! Grid extents implied by the selected simulation dimension.

use std::fmt;

pub const DEFAULT_EXTENT: &str = "64";
pub const UNIT_EXTENT: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridDimension {
    One,
    Two,
    Three,
}

impl GridDimension {
    /// Only the exact selector values `"1"` and `"2"` reduce the grid;
    /// anything else is treated as a full 3-D grid.
    pub fn from_selection(value: &str) -> Self {
        match value {
            "1" => GridDimension::One,
            "2" => GridDimension::Two,
            _ => GridDimension::Three,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GridDimension::One => "1",
            GridDimension::Two => "2",
            GridDimension::Three => "3",
        }
    }

    pub fn next(self) -> Self {
        match self {
            GridDimension::One => GridDimension::Two,
            GridDimension::Two => GridDimension::Three,
            GridDimension::Three => GridDimension::One,
        }
    }

    pub fn previous(self) -> Self {
        match self {
            GridDimension::One => GridDimension::Three,
            GridDimension::Two => GridDimension::One,
            GridDimension::Three => GridDimension::Two,
        }
    }

    pub fn layout(self) -> GridLayout {
        match self {
            GridDimension::One => GridLayout {
                nx: AxisUpdate::locked(UNIT_EXTENT),
                ny: AxisUpdate::locked(UNIT_EXTENT),
                nz: AxisUpdate::untouched(),
            },
            GridDimension::Two => GridLayout {
                nx: AxisUpdate::open(DEFAULT_EXTENT),
                ny: AxisUpdate::locked(UNIT_EXTENT),
                nz: AxisUpdate::untouched(),
            },
            GridDimension::Three => GridLayout {
                nx: AxisUpdate::open(DEFAULT_EXTENT),
                ny: AxisUpdate::open(DEFAULT_EXTENT),
                nz: AxisUpdate::untouched(),
            },
        }
    }
}

impl fmt::Display for GridDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// New state for one axis field. `value: None` leaves the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisUpdate {
    pub value: Option<&'static str>,
    pub enabled: bool,
}

impl AxisUpdate {
    fn locked(value: &'static str) -> Self {
        Self {
            value: Some(value),
            enabled: false,
        }
    }

    fn open(value: &'static str) -> Self {
        Self {
            value: Some(value),
            enabled: true,
        }
    }

    fn untouched() -> Self {
        Self {
            value: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub nx: AxisUpdate,
    pub ny: AxisUpdate,
    pub nz: AxisUpdate,
}

pub fn layout_for_selection(value: &str) -> GridLayout {
    GridDimension::from_selection(value).layout()
}
