//! Reference objects with known physical dimensions.

use serde::{Deserialize, Serialize};

use crate::error::CalibrationFailure;

/// An object whose size is known exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceObject {
    /// Stable identifier, e.g. `credit_card`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Physical width in meters; the dimension measured against pixel width.
    pub width_m: f64,
    /// Physical height in meters.
    pub height_m: f64,
}

impl ReferenceObject {
    /// Create a reference object.
    pub fn new(id: impl Into<String>, name: impl Into<String>, width_m: f64, height_m: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            width_m,
            height_m,
        }
    }

    /// ISO/IEC 7810 ID-1 card: 85.60 x 53.98 mm.
    pub fn credit_card() -> Self {
        Self::new("credit_card", "Credit card (ID-1)", 0.085_60, 0.053_98)
    }

    /// United States quarter dollar: 24.26 mm diameter.
    pub fn us_quarter() -> Self {
        Self::new("us_quarter", "US quarter", 0.024_26, 0.024_26)
    }

    /// ISO 216 A4 sheet: 210 x 297 mm.
    pub fn a4_sheet() -> Self {
        Self::new("a4_sheet", "A4 sheet", 0.210, 0.297)
    }
}

/// Source of reference objects.
pub trait ReferenceCatalog: Send + Sync {
    /// Object with the given identifier.
    fn lookup(&self, id: &str) -> Option<ReferenceObject>;

    /// Every object in the catalog.
    fn objects(&self) -> Vec<ReferenceObject>;

    /// Like [`lookup`](Self::lookup), failing with `UnknownReferenceObject`.
    fn resolve(&self, id: &str) -> Result<ReferenceObject, CalibrationFailure> {
        self.lookup(id)
            .ok_or_else(|| CalibrationFailure::UnknownReferenceObject { id: id.to_string() })
    }
}

/// The objects everyone has lying around.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCatalog;

impl ReferenceCatalog for BuiltinCatalog {
    fn lookup(&self, id: &str) -> Option<ReferenceObject> {
        self.objects().into_iter().find(|o| o.id == id)
    }

    fn objects(&self) -> Vec<ReferenceObject> {
        vec![
            ReferenceObject::credit_card(),
            ReferenceObject::us_quarter(),
            ReferenceObject::a4_sheet(),
        ]
    }
}
