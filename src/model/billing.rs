//! Close-time billing lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AssignmentId, BillId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillKind {
    Sign,
    Material,
}

impl BillKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BillKind::Sign => "sign",
            BillKind::Material => "material",
        }
    }
}

impl std::fmt::Display for BillKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BillKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sign" => Ok(BillKind::Sign),
            "material" => Ok(BillKind::Material),
            _ => Err(crate::error::Error::Other(format!("unknown bill kind: {s}"))),
        }
    }
}

/// Unit the measurement is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountUnit {
    Sqm,
    Units,
    Meters,
}

impl CountUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            CountUnit::Sqm => "sqm",
            CountUnit::Units => "units",
            CountUnit::Meters => "meters",
        }
    }
}

impl std::fmt::Display for CountUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CountUnit {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqm" => Ok(CountUnit::Sqm),
            "units" => Ok(CountUnit::Units),
            "meters" => Ok(CountUnit::Meters),
            _ => Err(crate::error::Error::Other(format!("unknown count unit: {s}"))),
        }
    }
}

/// One submitted billing line in a close or partial-close request.
///
/// A line carrying `bill_id` updates (or, at measurement zero, deletes)
/// the existing row; a line without one inserts a new row. The upsert is
/// keyed by this externally supplied id, not by content: resubmitting the
/// same logical line without an id creates a second row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillLine {
    pub bill_id: Option<BillId>,
    pub name: String,
    pub kind: BillKind,
    pub count_unit: CountUnit,
    pub jumping_ratio: Option<f64>,
    pub measurement: f64,
    pub image: Option<String>,
}

/// A persisted close-time billing row, attached to an assignment and read
/// by the reporting layer.
#[derive(Debug, Clone, Serialize)]
pub struct CloseJobBill {
    pub id: BillId,
    pub assignment_id: AssignmentId,
    pub name: String,
    pub kind: BillKind,
    pub count_unit: CountUnit,
    pub jumping_ratio: Option<f64>,
    pub measurement: f64,
    pub image: Option<String>,
    pub is_close_time_created: bool,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
