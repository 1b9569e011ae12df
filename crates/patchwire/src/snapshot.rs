//! A plain-data picture of a patch, for saving and loading.

use crate::canvas::DataMode;

/// One module of a saved patch.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleRecord {
    /// Key the edges below refer to this module by.
    pub key: u64,
    /// The `"collection/name"` id of the module's template.
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortRecord {
    pub module: u64,
    pub port: String,
}

impl PortRecord {
    pub fn new(module: u64, port: impl Into<String>) -> Self {
        Self {
            module,
            port: port.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AudioRecord {
    pub from: PortRecord,
    pub to: PortRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataRecord {
    pub from: PortRecord,
    pub to: PortRecord,
    pub mode: DataMode,
}

/// Modules and connections of a canvas.
///
/// Edges are grouped by source, each source's targets in connection order,
/// so replaying them rebuilds every adjacency list in the same order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PatchSnapshot {
    pub modules: Vec<ModuleRecord>,
    pub audio: Vec<AudioRecord>,
    pub data: Vec<DataRecord>,
}

impl PatchSnapshot {
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;
    use crate::{
        canvas::{Canvas, Ioid},
        testing::{place, registry},
    };

    #[test]
    fn test_snapshot_json() {
        let registry = registry();
        let mut canvas = Canvas::new();
        let sine = place(&mut canvas, &registry, "gen/sine");
        let gain = place(&mut canvas, &registry, "fx/gain");
        canvas.connect(&Ioid::new(sine, "out"), &Ioid::new(gain, "in")).unwrap();
        canvas
            .connect_data(&Ioid::new(sine, "level"), &Ioid::new(gain, "amount"), DataMode::Relative)
            .unwrap();

        let snapshot = canvas.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"gen/sine\""));

        let loaded: PatchSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, snapshot);
    }
}
